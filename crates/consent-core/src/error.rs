use thiserror::Error;

use crate::status::LinkStatus;

#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("token has expired")]
    TokenExpired,
    #[error("token is invalid")]
    TokenInvalid,
    #[error("link {0} not found")]
    LinkNotFound(i64),
    #[error("link {0} has expired")]
    LinkExpired(i64),
    #[error("link {link_id} is already {status}")]
    AlreadyFinal { link_id: i64, status: LinkStatus },
    #[error("link {link_id} cannot move from {from} to {to}")]
    IllegalTransition {
        link_id: i64,
        from: LinkStatus,
        to: LinkStatus,
    },
    #[error("link {link_id} is {status}, only AGREED links can be submitted")]
    NotAgreed { link_id: i64, status: LinkStatus },
    #[error("offer {0} not found")]
    OfferNotFound(i64),
    #[error("customer {0} not found")]
    CustomerNotFound(i64),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ConsentError {
    pub fn storage<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Storage(err.into())
    }
}

pub type ConsentResult<T> = Result<T, ConsentError>;
