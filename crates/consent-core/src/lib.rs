pub mod error;
pub mod line_items;
pub mod models;
pub mod status;
pub mod storage;
pub mod submission;
pub mod token;
pub mod workflow;

pub use error::{ConsentError, ConsentResult};
pub use line_items::{LineItemError, parse_line_items};
pub use models::{
    AddressSnapshot, ConsentRecord, Customer, DecisionSource, Link, NewConsent, NewLink, Offer,
    OfferComponent, OfferDetails, OfferSnapshot, OrderContext, OrderLineItem, OrderMapping,
};
pub use status::{Choice, Lifecycle, LinkStatus};
pub use storage::{DecidedLink, LinkStore, OpenedLink};
pub use submission::{SubmissionAttempt, SubmissionOutcome, SubmissionRecord};
pub use token::{TokenCodec, TokenError};
pub use workflow::{ConsentWorkflow, DEFAULT_LINK_TTL_DAYS, IssueLinkRequest, IssuedLink};
