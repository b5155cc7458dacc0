pub mod server;

use std::sync::Arc;

use crate::policy::{LinkIfVerified, LinkWithoutVerification, LinkingDisabled, LinkingPolicy};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyName {
    Disabled,
    NoVerification,
    IfVerified,
}

impl PolicyName {
    #[must_use]
    pub fn build(self) -> Arc<dyn LinkingPolicy> {
        match self {
            Self::Disabled => Arc::new(LinkingDisabled),
            Self::NoVerification => Arc::new(LinkWithoutVerification),
            Self::IfVerified => Arc::new(LinkIfVerified),
        }
    }
}

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: Option<String>,
        policy: PolicyName,
    },
    OpenApi,
}
