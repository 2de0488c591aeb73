//! Demo command - the tutorial flow end to end
//!
//! Builds a ResNet, moves its parameters and a batch of images to the device,
//! runs the forward pass there, then differentiates the conv + relu fixture.

use crate::output::{self, OutputFormat};
use clap::Args;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;
use xrt_client::{HarnessError, HarnessResult, Session};
use xrt_core::autodiff::value_and_gradients;
use xrt_core::layers::map_to_device;
use xrt_core::models::{conv_relu_fixture, resnet, ResNetConfig};
use xrt_core::{DType, HostValue, Literal};

#[derive(Args)]
pub struct DemoArgs {
    /// Config file (default: ~/.xrt/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Residual blocks per stage (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "1,1")]
    pub stages: Vec<usize>,

    /// Seed for weights and input images
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Images per batch
    #[arg(long, default_value_t = 2)]
    pub batch: usize,

    /// Image height and width
    #[arg(long, default_value_t = 32)]
    pub image_size: usize,

    /// Element type of parameters and inputs on the device (f32, bf16, ...)
    #[arg(long, default_value = "f32")]
    pub dtype: DType,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
}

struct DemoResult {
    probabilities: Vec<Vec<f64>>,
    loss: f64,
    weight_grad: f64,
    bias_grad: f64,
}

fn forward(session: &Session, args: &DemoArgs) -> HarnessResult<Vec<Vec<f64>>> {
    let config = ResNetConfig {
        stages: args.stages.clone(),
        seed: args.seed,
        image_size: args.image_size,
        ..ResNetConfig::default()
    };
    let model = map_to_device(&resnet(&config)?, args.dtype);
    tracing::debug!(parameters = model.parameter_count(), "model built");

    let shape = config.input_shape(args.batch);
    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(1));
    let dist = Uniform::new(0.0, 1.0);
    let pixels: Vec<f64> = (0..shape.size()).map(|_| dist.sample(&mut rng)).collect();

    let x = session.transfer(Literal::from_f64(args.dtype, shape, &pixels)?)?;
    let params = session.transfer(model.parameters())?;

    output::compiling("resnet_forward");
    let exe = session.trace("resnet_forward", &[&x, &params], move |_, p| model.forward(&p[0], &p[1]))?;
    output::running(&format!("resnet_forward on {}", x.value_type()));
    let probs = exe.execute(&[&x, &params])?.fetch()?.into_literal()?.to_f64_vec();

    Ok(probs.chunks(config.num_classes).map(<[f64]>::to_vec).collect())
}

fn conv_relu_gradient(session: &Session) -> HarnessResult<(f64, f64, f64)> {
    let fixture = conv_relu_fixture()?;
    let x = session.transfer(fixture.input.clone())?;
    let params = session.transfer(fixture.model.parameters())?;

    let model = fixture.model.clone();
    output::compiling("conv_relu_grad");
    let exe = session.trace("conv_relu_grad", &[&x, &params], move |_, p| {
        let loss = model.forward(&p[0], &p[1])?.sum_all()?;
        value_and_gradients(&loss, &[&p[1]])
    })?;
    let out = exe.execute(&[&x, &params])?.fetch()?;

    let scalar = |path: &[usize]| -> HarnessResult<f64> {
        out.get(path)
            .and_then(HostValue::as_literal)
            .and_then(|lit| lit.to_f64_vec().first().copied())
            .ok_or_else(|| HarnessError::assertion(format!("missing result element {:?}", path)))
    };
    Ok((scalar(&[0])?, scalar(&[1, 0, 0])?, scalar(&[1, 0, 1])?))
}

/// `None` when interrupted between the forward and gradient stages.
fn run(session: &Session, args: &DemoArgs) -> HarnessResult<Option<DemoResult>> {
    let probabilities = forward(session, args)?;
    if super::interrupted() {
        return Ok(None);
    }
    let (loss, weight_grad, bias_grad) = conv_relu_gradient(session)?;
    Ok(Some(DemoResult {
        probabilities,
        loss,
        weight_grad,
        bias_grad,
    }))
}

fn argmax(row: &[f64]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
        .0
}

pub fn execute(args: DemoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let mut harness = super::bootstrap(args.config.as_deref())?;
    let result = run(harness.session(), &args);
    let teardown = harness.teardown();
    for error in &teardown.errors {
        output::warning(&format!("teardown: {}", error));
    }
    super::exit_if_interrupted();
    let Some(result) = result? else {
        return Ok(());
    };

    match args.format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "probabilities": result.probabilities,
                "predictions": result.probabilities.iter().map(|row| argmax(row)).collect::<Vec<_>>(),
                "conv_relu": {
                    "loss": result.loss,
                    "weight_grad": result.weight_grad,
                    "bias_grad": result.bias_grad,
                },
                "teardown": teardown,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        },
        OutputFormat::Pretty => {
            for (i, row) in result.probabilities.iter().enumerate() {
                let class = argmax(row);
                println!("image {}: class {} (p = {:.4})", i, class, row[class]);
            }
            println!(
                "conv_relu: loss = {}, d/dweight = {}, d/dbias = {}",
                result.loss, result.weight_grad, result.bias_grad
            );
            output::finished(&format!("demo in {}", output::format_duration(started.elapsed())));
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
    }
}
