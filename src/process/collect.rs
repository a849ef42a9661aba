//! Draining of process output streams into strings.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::OutputStream;

/// Reads `stream` until end-of-data and returns everything it produced.
///
/// Chunks are appended in arrival order and decoded once at the end, so a
/// multi-byte character split across reads is preserved. Reading continues
/// until the stream itself closes, independent of when the producing process
/// exits. The stream is consumed, so it is released on success and on error.
///
/// # Errors
///
/// Returns the underlying I/O error if a read fails.
pub async fn collect<R>(mut stream: R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    while stream.read_buf(&mut buffer).await? != 0 {}

    Ok(match String::from_utf8(buffer) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    })
}

/// Like [`collect`], returning an empty string when there is no stream.
///
/// # Errors
///
/// Returns the underlying I/O error if a read fails.
pub async fn collect_optional(stream: Option<OutputStream>) -> io::Result<String> {
    match stream {
        Some(reader) => collect(reader).await,
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn collect_returns_empty_string_for_empty_stream() {
        let text = collect(&b""[..]).await.expect("collect empty stream");
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn collect_optional_without_stream_is_empty() {
        let text = collect_optional(None).await.expect("collect missing stream");
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn collect_concatenates_chunks_in_arrival_order() {
        let (mut writer, reader) = tokio::io::duplex(4);
        let producer = tokio::spawn(async move {
            for chunk in ["alpha ", "beta ", "gamma"] {
                writer
                    .write_all(chunk.as_bytes())
                    .await
                    .expect("write chunk");
            }
        });

        let text = collect(reader).await.expect("collect chunks");
        producer.await.expect("producer task");

        assert_eq!(text, "alpha beta gamma");
    }

    #[tokio::test]
    async fn collect_keeps_characters_split_across_reads() {
        let (mut writer, reader) = tokio::io::duplex(1);
        let producer = tokio::spawn(async move {
            writer.write_all("naïve ✓".as_bytes()).await.expect("write");
        });

        let text = collect(reader).await.expect("collect split characters");
        producer.await.expect("producer task");

        assert_eq!(text, "naïve ✓");
    }
}
