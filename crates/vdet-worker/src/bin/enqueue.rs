//! Submit a detection job and optionally follow it to completion.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures_util::StreamExt;
use validator::Validate;

use vdet_models::{Job, JobOutcome};
use vdet_queue::{JobQueue, ProgressChannel};

/// Enqueue a video detection job
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video file the worker should analyze
    #[arg(value_name = "FILE")]
    video_path: String,

    /// Minimum detection confidence (0.0 - 1.0); worker default when unset
    #[arg(long, value_name = "THRESHOLD")]
    confidence: Option<f32>,

    /// Model path or name; worker default when unset
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,

    /// Job ID; a random UUID when unset
    #[arg(long)]
    id: Option<String>,

    /// Print progress and wait for the outcome
    #[arg(long)]
    follow: bool,

    /// Give up following after this many seconds
    #[arg(long, default_value = "3600", value_name = "SECS")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut job = Job::new(&args.video_path);
    if let Some(id) = args.id {
        job = job.with_id(id);
    }
    if let Some(confidence) = args.confidence {
        job = job.with_confidence(confidence);
    }
    if let Some(model) = args.model {
        job = job.with_model(model);
    }
    job.data.validate().context("invalid job")?;

    let queue = JobQueue::from_env().context("failed to create job queue")?;
    queue.init().await?;

    // Subscribe before enqueueing so early progress is not missed.
    let progress = if args.follow {
        let channel = ProgressChannel::new(&queue.config().redis_url, &queue.config().key_prefix)?;
        Some(channel.subscribe(&job.id).await?)
    } else {
        None
    };

    let message_id = queue.enqueue(&job).await?;
    println!("enqueued job {} as message {}", job.id, message_id);

    let Some(mut progress) = progress else {
        return Ok(());
    };

    let printer = tokio::spawn(async move {
        while let Some(event) = progress.next().await {
            println!("progress {}%", event.progress);
            if event.progress >= 100 {
                break;
            }
        }
    });

    let record = queue
        .wait_for_outcome(&job.id, Duration::from_millis(500), Duration::from_secs(args.timeout))
        .await?;
    printer.abort();

    match record.and_then(|r| r.result) {
        Some(JobOutcome::Success {
            processed_frames,
            total_frames,
            result_location,
        }) => {
            println!(
                "success: {}/{} frames, results at {}",
                processed_frames, total_frames, result_location
            );
            Ok(())
        }
        Some(JobOutcome::Error { message }) => Err(anyhow::anyhow!("job failed: {}", message)),
        None => Err(anyhow::anyhow!(
            "no outcome for job {} after {}s",
            job.id,
            args.timeout
        )),
    }
}
