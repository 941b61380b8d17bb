//! Client-wide values that outlive any single user or target

/// Session token issued by the backend
#[derive(Debug, Default)]
pub struct GlobalsCache {
    session_token: Vec<u8>,
    dirty: bool,
}

impl GlobalsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_token(&self) -> &[u8] {
        &self.session_token
    }

    pub fn set_session_token(&mut self, token: Vec<u8>) {
        self.session_token = token;
        self.dirty = true;
    }

    /// True once if the token changed since the last call
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Installs a recovered token without marking it dirty
    pub fn restore_session_token(&mut self, token: Vec<u8>) {
        self.session_token = token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token() {
        let mut globals = GlobalsCache::new();
        assert!(globals.session_token().is_empty());
        globals.set_session_token(b"token".to_vec());
        assert_eq!(globals.session_token(), b"token");
        assert!(globals.take_dirty());
        assert!(!globals.take_dirty());
    }
}
