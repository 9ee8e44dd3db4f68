use crate::store;

/// Identity of the signed-in operator. Passed explicitly to every component
/// that reads or writes the user's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    uid: String,
}

impl Session {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// `users/{uid}`
    pub fn root_path(&self) -> String {
        store::user_path(&self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_is_scoped_to_uid() {
        let s = Session::new("abc123");
        assert_eq!(s.uid(), "abc123");
        assert_eq!(s.root_path(), "users/abc123");
    }
}
