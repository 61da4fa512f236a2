/// The role a server plays in its deployment, as reported by its handshake.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, derive_more::Display)]
#[non_exhaustive]
pub enum ServerType {
    Standalone,
    Mongos,
    RsPrimary,
    RsSecondary,
    RsArbiter,
    RsOther,
    RsGhost,
    #[default]
    Unknown,
}

impl ServerType {
    pub(crate) fn is_standalone(self) -> bool {
        matches!(self, ServerType::Standalone)
    }

    pub(crate) fn is_mongos(self) -> bool {
        matches!(self, ServerType::Mongos)
    }
}
