//! Receiving a target/reference pair.
//!
//! An [`UploadSession`] owns everything written for one request. Until it is
//! handed to the manager and accepted, all of its files live in temporary
//! storage and disappear when the session is dropped, so a rejected request
//! never leaves anything behind.

use super::file_handler::{FileHandler, ReceivedUpload, UploadError, UploadRole};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// A received file together with the name the client gave it.
pub struct SessionFile {
    pub filename: String,
    pub upload: ReceivedUpload,
}

/// State of one in-flight `POST /mix` request.
pub struct UploadSession {
    job_id: String,
    file_handler: Arc<FileHandler>,
    target: Option<SessionFile>,
    reference: Option<SessionFile>,
}

impl UploadSession {
    pub(super) fn new(file_handler: Arc<FileHandler>) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            file_handler,
            target: None,
            reference: None,
        }
    }

    /// The id the job will get if this session is accepted.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Stream one upload to disk.
    ///
    /// The extension is checked before anything is written. The stream is
    /// consumed chunk by chunk and never buffered whole. Stream errors are
    /// converted by the caller, so a body-limit failure keeps its meaning.
    pub async fn receive<S, B, E>(
        &mut self,
        role: UploadRole,
        filename: &str,
        stream: S,
    ) -> Result<(), UploadError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Into<UploadError>,
    {
        if self.slot(role).is_some() {
            return Err(UploadError::DuplicateField(role));
        }

        let extension = self.file_handler.validate_extension(role, filename)?;
        let mut staged = self
            .file_handler
            .begin_upload(&self.job_id, role, &extension)?;

        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Into::<UploadError>::into)?;
            staged.write_chunk(chunk.as_ref()).await?;
        }

        let upload = staged.finish().await?;
        debug!(
            "Received {} file '{}' for job {} ({} bytes, {})",
            role, filename, self.job_id, upload.size, upload.fingerprint
        );

        *self.slot(role) = Some(SessionFile {
            filename: filename.to_string(),
            upload,
        });
        Ok(())
    }

    fn slot(&mut self, role: UploadRole) -> &mut Option<SessionFile> {
        match role {
            UploadRole::Target => &mut self.target,
            UploadRole::Reference => &mut self.reference,
        }
    }

    /// Take both files, checking that they are present and distinct.
    pub(super) fn into_pair(self) -> Result<(String, SessionFile, SessionFile), UploadError> {
        let target = self
            .target
            .ok_or(UploadError::MissingField(UploadRole::Target))?;
        let reference = self
            .reference
            .ok_or(UploadError::MissingField(UploadRole::Reference))?;

        if target.upload.fingerprint == reference.upload.fingerprint {
            return Err(UploadError::IdenticalFiles);
        }

        Ok((self.job_id, target, reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixing::file_handler::DEFAULT_ALLOWED_EXTENSIONS;
    use futures::stream;
    use tempfile::TempDir;

    async fn file_handler(dir: &TempDir, max: u64) -> Arc<FileHandler> {
        let allowed: Vec<String> = DEFAULT_ALLOWED_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .collect();
        let handler = FileHandler::new(
            dir.path().join("uploads"),
            dir.path().join("processed"),
            max,
            &allowed,
        );
        handler.init().await.unwrap();
        Arc::new(handler)
    }

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<&'static [u8], UploadError>> {
        stream::iter(parts.iter().copied().map(Ok).collect::<Vec<_>>())
    }

    fn upload_count(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path().join("uploads")).unwrap().count()
    }

    #[tokio::test]
    async fn test_receive_pair() {
        let dir = TempDir::new().unwrap();
        let mut session = UploadSession::new(file_handler(&dir, 1024).await);

        session
            .receive(UploadRole::Target, "a.wav", chunks(&[b"target", b"-data"]))
            .await
            .unwrap();
        session
            .receive(UploadRole::Reference, "b.mp3", chunks(&[b"reference"]))
            .await
            .unwrap();

        let (job_id, target, reference) = session.into_pair().unwrap();
        assert!(!job_id.is_empty());
        assert_eq!(target.filename, "a.wav");
        assert_eq!(target.upload.size, 11);
        assert_eq!(reference.upload.extension, "mp3");
    }

    #[tokio::test]
    async fn test_identical_files_rejected_and_cleaned() {
        let dir = TempDir::new().unwrap();
        let mut session = UploadSession::new(file_handler(&dir, 1024).await);

        session
            .receive(UploadRole::Target, "a.wav", chunks(&[b"same", b"bytes"]))
            .await
            .unwrap();
        session
            .receive(UploadRole::Reference, "b.wav", chunks(&[b"samebytes"]))
            .await
            .unwrap();
        assert_eq!(upload_count(&dir), 2);

        let result = session.into_pair();
        assert!(matches!(result, Err(UploadError::IdenticalFiles)));
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_missing_reference() {
        let dir = TempDir::new().unwrap();
        let mut session = UploadSession::new(file_handler(&dir, 1024).await);
        session
            .receive(UploadRole::Target, "a.wav", chunks(&[b"data"]))
            .await
            .unwrap();

        let result = session.into_pair();
        assert!(matches!(
            result,
            Err(UploadError::MissingField(UploadRole::Reference))
        ));
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_duplicate_field() {
        let dir = TempDir::new().unwrap();
        let mut session = UploadSession::new(file_handler(&dir, 1024).await);
        session
            .receive(UploadRole::Target, "a.wav", chunks(&[b"one"]))
            .await
            .unwrap();
        let err = session
            .receive(UploadRole::Target, "b.wav", chunks(&[b"two"]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::DuplicateField(UploadRole::Target)));
    }

    #[tokio::test]
    async fn test_too_large_aborts_midstream() {
        let dir = TempDir::new().unwrap();
        let mut session = UploadSession::new(file_handler(&dir, 8).await);

        let err = session
            .receive(
                UploadRole::Target,
                "a.wav",
                chunks(&[b"12345", b"67890", b"never read"]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::FileTooLarge(UploadRole::Target, _)));
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_bad_extension_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut session = UploadSession::new(file_handler(&dir, 1024).await);
        let err = session
            .receive(UploadRole::Reference, "cover.png", chunks(&[b"png"]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidExtension { .. }));
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_stream_error_keeps_its_kind() {
        let dir = TempDir::new().unwrap();
        let mut session = UploadSession::new(file_handler(&dir, 1024).await);
        let truncated = stream::iter(vec![
            Ok(&b"partial"[..]),
            Err(UploadError::Malformed("connection reset".to_string())),
        ]);
        let err = session
            .receive(UploadRole::Target, "a.wav", truncated)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Malformed(_)));

        let over_limit = stream::iter(vec![Ok(&b"partial"[..]), Err(UploadError::RequestTooLarge)]);
        let err = session
            .receive(UploadRole::Reference, "b.wav", over_limit)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::RequestTooLarge));
        assert_eq!(err.reason(), "too_large");
        assert_eq!(upload_count(&dir), 0);
    }
}
