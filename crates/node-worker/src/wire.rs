//! Pair framing
//!
//! Every message is a *pair*: a name and a value, each prefixed by its byte
//! length as a little-endian `u64`. Numbers travel as decimal text.
//!
//! ```text
//! [len: u64 LE][name bytes][len: u64 LE][value bytes]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, WorkerError};

/// Largest name or value a peer may announce
pub const MAX_FRAME_LEN: u64 = 1 << 30;

/// Write one pair
pub async fn send_pair<W>(writer: &mut W, name: &str, value: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(16 + name.len() + value.len());
    buf.extend_from_slice(&(name.len() as u64).to_le_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
    writer.write_all(&buf).await?;
    Ok(())
}

/// Write a pair whose value is a count
pub async fn send_pair_number<W>(writer: &mut W, name: &str, value: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    send_pair(writer, name, &value.to_string()).await
}

async fn recv_bytes<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u64_le().await?;
    if len > MAX_FRAME_LEN {
        return Err(WorkerError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read one pair; a stream that ends early is an error
pub async fn recv_pair<R>(reader: &mut R) -> Result<(String, String)>
where
    R: AsyncRead + Unpin,
{
    let name = recv_bytes(reader).await?;
    let value = recv_bytes(reader).await?;
    Ok((name, value))
}

/// Read a pair whose value is a count
pub async fn recv_pair_number<R>(reader: &mut R) -> Result<(String, usize)>
where
    R: AsyncRead + Unpin,
{
    let (name, value) = recv_pair(reader).await?;
    let n = value
        .trim()
        .parse::<usize>()
        .map_err(|_| WorkerError::InvalidNumber(value.clone()))?;
    Ok((name, n))
}

/// Read a pair and require its name
pub async fn expect_pair<R>(reader: &mut R, expected: &str) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let (name, value) = recv_pair(reader).await?;
    if name != expected {
        return Err(WorkerError::UnexpectedMessage {
            expected: expected.to_string(),
            got: name,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_layout() {
        let mut buf = Vec::new();
        send_pair(&mut buf, "ab", "xyz").await.unwrap();
        assert_eq!(&buf[..8], &2u64.to_le_bytes());
        assert_eq!(&buf[8..10], b"ab");
        assert_eq!(&buf[10..18], &3u64.to_le_bytes());
        assert_eq!(&buf[18..], b"xyz");
    }

    #[tokio::test]
    async fn test_pair_split_across_reads() {
        let mut reply = Vec::new();
        reply.extend_from_slice(&2u64.to_le_bytes());
        reply.extend_from_slice(b"ok");
        reply.extend_from_slice(&0u64.to_le_bytes());
        let mut stream = tokio_test::io::Builder::new()
            .read(&4u64.to_le_bytes()[..3])
            .read(&4u64.to_le_bytes()[3..])
            .read(b"pr")
            .read(b"oc")
            .read(&3u64.to_le_bytes())
            .read(b"0.5")
            .write(&reply)
            .build();

        assert_eq!(
            recv_pair(&mut stream).await.unwrap(),
            ("proc".to_string(), "0.5".to_string())
        );
        send_pair(&mut stream, "ok", "").await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_length_values() {
        let mut buf = Vec::new();
        send_pair(&mut buf, "error", "").await.unwrap();
        send_pair(&mut buf, "", "").await.unwrap();
        send_pair_number(&mut buf, "attrs", 3).await.unwrap();

        let mut reader = buf.as_slice();
        assert_eq!(
            recv_pair(&mut reader).await.unwrap(),
            ("error".to_string(), String::new())
        );
        assert_eq!(recv_pair(&mut reader).await.unwrap(), (String::new(), String::new()));
        assert_eq!(
            recv_pair_number(&mut reader).await.unwrap(),
            ("attrs".to_string(), 3)
        );
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_short_stream_is_error() {
        let mut buf = Vec::new();
        send_pair(&mut buf, "name", "value").await.unwrap();
        buf.truncate(buf.len() - 2);
        let mut reader = buf.as_slice();
        assert!(matches!(recv_pair(&mut reader).await, Err(WorkerError::Io(_))));
    }

    #[tokio::test]
    async fn test_invalid_number() {
        let mut buf = Vec::new();
        send_pair(&mut buf, "attrs", "many").await.unwrap();
        let mut reader = buf.as_slice();
        assert!(matches!(
            recv_pair_number(&mut reader).await,
            Err(WorkerError::InvalidNumber(v)) if v == "many"
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        let mut reader = buf.as_slice();
        assert!(matches!(
            recv_pair(&mut reader).await,
            Err(WorkerError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_expect_pair() {
        let mut buf = Vec::new();
        send_pair(&mut buf, "uid", "42").await.unwrap();
        let mut reader = buf.as_slice();
        assert!(matches!(
            expect_pair(&mut reader, "attrs").await,
            Err(WorkerError::UnexpectedMessage { .. })
        ));
    }
}
