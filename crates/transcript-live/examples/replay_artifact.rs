use std::sync::Arc;

use tokio::sync::watch;
use transcript_live::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ObserveError> {
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| ObserveError::Validation("usage: replay_artifact <file.jsonl>".into()))?;
    let observer = Observer::builder()
        .pull(Arc::new(JsonlArtifactSource::new(path)))
        .build()?;
    let (_status, status_rx) = watch::channel(RunStatus::Completed);

    let handle = observer.observe::<TranscriptBuilder>("artifact", status_rx);
    let views = handle.subscribe();
    handle.join().await?;

    for block in &views.borrow().blocks {
        match block {
            TranscriptBlock::Text { content, .. } => println!("{content}"),
            TranscriptBlock::Tool(tool) => println!(
                "> {} {}",
                tool.call.label(),
                tool.call.short_summary().unwrap_or_default()
            ),
            TranscriptBlock::Complete { total_tokens } => {
                println!("run complete ({} tokens)", total_tokens.unwrap_or(0))
            }
        }
    }
    Ok(())
}
