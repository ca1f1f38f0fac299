use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Session tokens shared with whoever needs them, backed by a JSON file.
///
/// `init` hydrates from disk; every setter updates memory and writes the
/// file before returning.
#[derive(Debug)]
pub struct SessionContext {
    path: PathBuf,
    session: Session,
}

impl SessionContext {
    pub fn init(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let session = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Session::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            "🔐 Session loaded from {} (authenticated: {})",
            path.display(),
            session.is_authenticated()
        );

        Ok(Self { path, session })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn access_token(&self) -> Option<&str> {
        self.session.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.session.refresh_token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn set_access_token(&mut self, token: impl Into<String>) -> Result<(), SessionError> {
        self.session.access_token = Some(token.into());
        self.persist()
    }

    pub fn set_refresh_token(&mut self, token: impl Into<String>) -> Result<(), SessionError> {
        self.session.refresh_token = Some(token.into());
        self.persist()
    }

    pub fn set_tokens(
        &mut self,
        access: impl Into<String>,
        refresh: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.session.access_token = Some(access.into());
        self.session.refresh_token = Some(refresh.into());
        self.persist()
    }

    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.session = Session::default();
        self.persist()
    }

    fn persist(&self) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.session)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
