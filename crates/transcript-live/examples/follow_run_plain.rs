use std::sync::Arc;

use transcript_live::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ObserveError> {
    let run_id = std::env::args()
        .nth(1)
        .ok_or_else(|| ObserveError::Validation("usage: follow_run_plain <run-id>".into()))?;
    let service = Arc::new(HttpRunService::from_env()?);
    let run_id = RunId::new(run_id);
    let status =
        StatusWatch::start(service.clone(), run_id.clone(), DEFAULT_STATUS_INTERVAL).await?;

    let observer = Observer::builder()
        .pull(service.clone())
        .push(service)
        .build()?;
    let mut handle = observer.observe::<PlainLogBuilder>(run_id, status.receiver());

    let mut printed = 0;
    while let Some(view) = handle.changed().await {
        if view.blocks.len() < printed {
            // A late gap fill reordered earlier lines; reprint from the top.
            printed = 0;
        }
        for line in &view.blocks[printed..] {
            println!("[{}] {}", line.stream, line.line);
        }
        printed = view.blocks.len();
    }

    let report = handle.join().await?;
    eprintln!("{} events, {} pulled, {} pushed", report.events, report.pulled, report.pushed);
    Ok(())
}
