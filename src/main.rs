// Compares the fused kernels against the unfused reference on random logits.
//
//   fused-xent [rows] [vocab] [max_fused_size]
//
// RUST_LOG=fused_xent=debug shows which reduction path each call takes.

use fused_xent::{
    CrossEntropyConfig, FusedCrossEntropy, IGNORE_INDEX, Loss, UnfusedCrossEntropy, UpstreamGrad,
};
use ndarray::{Array1, Array2, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::time::Instant;
use tracing::info;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

// Logits ~ N(0, 4), roughly one label in ten set to the ignore index
fn random_batch(rows: usize, vocab: usize, seed: u64) -> Result<(Array2<f32>, Array1<i64>), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, 4.0)?;
    let logits = Array2::from_shape_simple_fn((rows, vocab), || normal.sample(&mut rng));
    let labels = Array1::from_shape_simple_fn(rows, || {
        if rng.random_bool(0.1) {
            IGNORE_INDEX
        } else {
            rng.random_range(0..vocab as i64)
        }
    });
    Ok((logits, labels))
}

fn parse_arg(args: &[String], index: usize, default: usize) -> Result<usize, std::num::ParseIntError> {
    args.get(index).map_or(Ok(default), |a| a.parse())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let rows = parse_arg(&args, 0, 256)?;
    let vocab = parse_arg(&args, 1, 131_072)?;
    let max_fused = parse_arg(&args, 2, fused_xent::MAX_FUSED_SIZE)?;
    if vocab == 0 {
        return Err("vocab must be positive".into());
    }

    let config = CrossEntropyConfig::new().with_max_fused_size(max_fused);
    let fused = FusedCrossEntropy::new(config.clone())?;
    let reference = UnfusedCrossEntropy::new(config)?;

    info!(rows, vocab, max_fused, "generating logits");
    let (logits, labels) = random_batch(rows, vocab, 42)?;

    let start = Instant::now();
    let fused_out = fused.forward(logits.view(), labels.view())?;
    let fused_forward = start.elapsed();

    let start = Instant::now();
    let ref_out = reference.forward(logits.view(), labels.view())?;
    let ref_forward = start.elapsed();

    let fused_mean = fused_out.mean_loss()?;
    let ref_mean = ref_out.mean_loss()?;
    info!(
        fused_mean,
        reference_mean = ref_mean,
        valid = fused_out.n_valid,
        ?fused_forward,
        ?ref_forward,
        "forward"
    );

    let scale = fused_out.upstream_scale(fused.reduction())?;
    let mut fused_grad = logits.clone();
    let mut ref_grad = logits;

    let start = Instant::now();
    fused.backward_in_place(
        fused_grad.view_mut(),
        fused_out.logsumexp.view(),
        labels.view(),
        UpstreamGrad::Scalar(scale),
    )?;
    let fused_backward = start.elapsed();

    let start = Instant::now();
    reference.backward_in_place(
        ref_grad.view_mut(),
        ref_out.logsumexp.view(),
        labels.view(),
        UpstreamGrad::Scalar(scale),
    )?;
    let ref_backward = start.elapsed();

    let max_diff = Zip::from(&fused_grad)
        .and(&ref_grad)
        .fold(0.0f32, |acc, &a, &b| acc.max((a - b).abs()));
    info!(max_diff, ?fused_backward, ?ref_backward, "backward");

    Ok(())
}
