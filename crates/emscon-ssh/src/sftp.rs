use anyhow::Result;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub struct SftpClient {
    inner: SftpSession,
}

impl SftpClient {
    pub async fn new<S>(stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let inner = SftpSession::new(stream).await?;
        Ok(Self { inner })
    }

    /// Creates or truncates `path` and writes `data` to it.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<u64> {
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        let mut file = self.inner.open_with_flags(path, flags).await?;
        file.write_all(data).await?;
        file.shutdown().await?;
        Ok(data.len() as u64)
    }

    pub async fn close(self) -> Result<()> {
        self.inner.close().await?;
        Ok(())
    }
}
