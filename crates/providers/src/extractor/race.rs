use tokio::sync::mpsc;
use tracing::debug;

use super::error::ExtractorError;
use crate::media::StreamDescriptor;

/// Collect raced candidate results until one carries subtitles, which wins
/// immediately. Otherwise the first successful candidate wins once every
/// sender has finished. Results arriving after the receiver is dropped are
/// discarded by the closed channel.
pub(crate) async fn first_subtitled_or_first(
    mut results: mpsc::Receiver<Result<StreamDescriptor, ExtractorError>>,
) -> Result<StreamDescriptor, ExtractorError> {
    let mut first_ok: Option<StreamDescriptor> = None;
    let mut last_err: Option<ExtractorError> = None;

    while let Some(result) = results.recv().await {
        match result {
            Ok(descriptor) if descriptor.has_subtitles() => {
                debug!(
                    server = descriptor.selected_server.as_deref().unwrap_or("?"),
                    "subtitled candidate wins the race"
                );
                return Ok(descriptor);
            }
            Ok(descriptor) => {
                if first_ok.is_none() {
                    first_ok = Some(descriptor);
                }
            }
            Err(err) => {
                debug!(error = %err, "candidate failed");
                last_err = Some(err);
            }
        }
    }

    match first_ok {
        Some(descriptor) => Ok(descriptor),
        None => Err(last_err.unwrap_or(ExtractorError::NotFound)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::factory::ProviderKind;
    use crate::media::SubtitleTrack;

    fn plain(url: &str, server: &str) -> StreamDescriptor {
        let mut descriptor = StreamDescriptor::new(ProviderKind::Embedo, url);
        descriptor.selected_server = Some(server.to_string());
        descriptor
    }

    fn subtitled(url: &str, server: &str) -> StreamDescriptor {
        plain(url, server).with_subtitles(vec![SubtitleTrack {
            language: "en".to_string(),
            url: "https://subs.example/en.vtt".to_string(),
        }])
    }

    #[tokio::test]
    async fn subtitled_candidate_short_circuits() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(plain("https://a.example/1.m3u8", "a")))
            .await
            .unwrap();
        tx.send(Ok(subtitled("https://b.example/2.m3u8", "b")))
            .await
            .unwrap();
        drop(tx);

        let winner = first_subtitled_or_first(rx).await.unwrap();
        assert_eq!(winner.selected_server.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn first_success_wins_when_nothing_is_subtitled() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Err(ExtractorError::NotFound)).await.unwrap();
        tx.send(Ok(plain("https://a.example/1.m3u8", "a")))
            .await
            .unwrap();
        tx.send(Ok(plain("https://b.example/2.m3u8", "b")))
            .await
            .unwrap();
        drop(tx);

        let winner = first_subtitled_or_first(rx).await.unwrap();
        assert_eq!(winner.selected_server.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn all_failures_surface_the_last_error() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Err(ExtractorError::NotFound)).await.unwrap();
        tx.send(Err(ExtractorError::decode("bad payload")))
            .await
            .unwrap();
        drop(tx);

        let err = first_subtitled_or_first(rx).await.unwrap_err();
        assert!(matches!(err, ExtractorError::Decode(_)));
    }
}
