use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConsentError, ConsentResult};
use crate::models::Link;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    New,
    Opened,
    Agreed,
    Rejected,
    Expired,
}

impl LinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkStatus::New => "NEW",
            LinkStatus::Opened => "OPENED",
            LinkStatus::Agreed => "AGREED",
            LinkStatus::Rejected => "REJECTED",
            LinkStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(LinkStatus::New),
            "OPENED" => Ok(LinkStatus::Opened),
            "AGREED" => Ok(LinkStatus::Agreed),
            "REJECTED" => Ok(LinkStatus::Rejected),
            "EXPIRED" => Ok(LinkStatus::Expired),
            other => anyhow::bail!("unknown link status: {other}"),
        }
    }

    /// AGREED and REJECTED carry a customer decision and never change again.
    pub fn is_decided(self) -> bool {
        matches!(self, LinkStatus::Agreed | LinkStatus::Rejected)
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        self.is_decided() || self == LinkStatus::Expired
    }

    pub fn can_transition_to(self, next: LinkStatus) -> bool {
        use LinkStatus::*;

        matches!(
            (self, next),
            (New, Opened) | (Opened, Agreed) | (Opened, Rejected) | (New, Expired) | (Opened, Expired)
        )
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Choice {
    Agreed,
    Rejected,
}

impl Choice {
    pub fn as_str(self) -> &'static str {
        self.status().as_str()
    }

    pub fn status(self) -> LinkStatus {
        match self {
            Choice::Agreed => LinkStatus::Agreed,
            Choice::Rejected => LinkStatus::Rejected,
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match LinkStatus::parse(value)? {
            LinkStatus::Agreed => Ok(Choice::Agreed),
            LinkStatus::Rejected => Ok(Choice::Rejected),
            other => anyhow::bail!("{other} is not a decision"),
        }
    }
}

/// The mutable part of a link row. Stores persist it whenever it differs
/// from what they loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    pub status: LinkStatus,
    pub opened_at: Option<DateTime<Utc>>,
    pub agreed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

impl Link {
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle {
            status: self.status,
            opened_at: self.opened_at,
            agreed_at: self.agreed_at,
            rejected_at: self.rejected_at,
        }
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Rejects a verified token that is no longer the one stored on the row.
    pub fn authorize(&self, token: &str) -> ConsentResult<()> {
        match self.token.as_deref() {
            Some(stored) if stored == token => Ok(()),
            _ => Err(ConsentError::TokenInvalid),
        }
    }

    /// Records a landing visit. Returns `true` only for the visit that moved
    /// the link from NEW to OPENED.
    pub fn open(&mut self, now: DateTime<Utc>) -> ConsentResult<bool> {
        if self.status.is_decided() {
            return Ok(false);
        }
        self.enforce_expiry(now)?;

        if self.status == LinkStatus::New {
            self.transition(LinkStatus::Opened)?;
            self.opened_at = Some(now);
            return Ok(true);
        }

        Ok(false)
    }

    /// Records the customer's decision. Expiry wins over the decision; a link
    /// that already carries a decision is left untouched.
    pub fn decide(&mut self, choice: Choice, now: DateTime<Utc>) -> ConsentResult<()> {
        if self.status.is_decided() {
            return Err(ConsentError::AlreadyFinal {
                link_id: self.id,
                status: self.status,
            });
        }
        self.enforce_expiry(now)?;

        if self.status == LinkStatus::New {
            self.transition(LinkStatus::Opened)?;
            self.opened_at.get_or_insert(now);
        }

        self.transition(choice.status())?;
        match choice {
            Choice::Agreed => self.agreed_at = Some(now),
            Choice::Rejected => self.rejected_at = Some(now),
        }

        Ok(())
    }

    fn enforce_expiry(&mut self, now: DateTime<Utc>) -> ConsentResult<()> {
        if self.status == LinkStatus::Expired {
            return Err(ConsentError::LinkExpired(self.id));
        }
        if self.is_past_expiry(now) {
            self.transition(LinkStatus::Expired)?;
            return Err(ConsentError::LinkExpired(self.id));
        }
        Ok(())
    }

    fn transition(&mut self, next: LinkStatus) -> ConsentResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ConsentError::IllegalTransition {
                link_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::test_support::sample_link;

    const ALL: [LinkStatus; 5] = [
        LinkStatus::New,
        LinkStatus::Opened,
        LinkStatus::Agreed,
        LinkStatus::Rejected,
        LinkStatus::Expired,
    ];

    fn rank(status: LinkStatus) -> u8 {
        match status {
            LinkStatus::New => 0,
            LinkStatus::Opened => 1,
            _ => 2,
        }
    }

    #[test]
    fn transitions_only_move_forward() {
        for from in ALL {
            for to in ALL {
                if from.can_transition_to(to) {
                    assert!(rank(to) > rank(from), "{from} -> {to} regresses");
                }
            }
        }
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for from in ALL.into_iter().filter(|status| status.is_terminal()) {
            assert!(ALL.iter().all(|to| !from.can_transition_to(*to)));
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in ALL {
            assert_eq!(LinkStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(LinkStatus::parse("USED").is_err());
        assert!(Choice::parse("opened").is_err());
        assert_eq!(Choice::parse("agreed").unwrap(), Choice::Agreed);
    }

    #[test]
    fn first_open_moves_new_to_opened_once() {
        let now = Utc::now();
        let mut link = sample_link(now + Duration::days(1));

        assert!(link.open(now).unwrap());
        assert_eq!(link.status, LinkStatus::Opened);
        assert_eq!(link.opened_at, Some(now));

        let later = now + Duration::minutes(5);
        assert!(!link.open(later).unwrap());
        assert_eq!(link.opened_at, Some(now));
    }

    #[test]
    fn open_past_expiry_expires_the_link() {
        let now = Utc::now();
        let mut link = sample_link(now - Duration::seconds(1));

        let err = link.open(now).unwrap_err();
        assert!(matches!(err, ConsentError::LinkExpired(_)));
        assert_eq!(link.status, LinkStatus::Expired);
        assert!(link.opened_at.is_none());
    }

    #[test]
    fn decision_on_new_link_passes_through_opened() {
        let now = Utc::now();
        let mut link = sample_link(now + Duration::days(1));

        link.decide(Choice::Rejected, now).unwrap();
        assert_eq!(link.status, LinkStatus::Rejected);
        assert_eq!(link.opened_at, Some(now));
        assert_eq!(link.rejected_at, Some(now));
        assert!(link.agreed_at.is_none());
    }

    #[test]
    fn second_decision_is_already_final_and_mutates_nothing() {
        let now = Utc::now();
        let mut link = sample_link(now + Duration::days(1));
        link.decide(Choice::Agreed, now).unwrap();
        let before = link.lifecycle();

        let err = link
            .decide(Choice::Rejected, now + Duration::minutes(1))
            .unwrap_err();
        assert!(matches!(
            err,
            ConsentError::AlreadyFinal {
                status: LinkStatus::Agreed,
                ..
            }
        ));
        assert_eq!(link.lifecycle(), before);
        assert!(link.rejected_at.is_none());
    }

    #[test]
    fn expiry_takes_precedence_over_decision() {
        let now = Utc::now();
        let mut link = sample_link(now - Duration::hours(1));
        link.status = LinkStatus::Opened;
        link.opened_at = Some(now - Duration::hours(2));

        let err = link.decide(Choice::Agreed, now).unwrap_err();
        assert!(matches!(err, ConsentError::LinkExpired(_)));
        assert_eq!(link.status, LinkStatus::Expired);
        assert!(link.agreed_at.is_none());

        let err = link.decide(Choice::Agreed, now).unwrap_err();
        assert!(matches!(err, ConsentError::LinkExpired(_)));
    }

    #[test]
    fn decided_link_is_not_expired_by_a_late_visit() {
        let now = Utc::now();
        let mut link = sample_link(now + Duration::minutes(1));
        link.decide(Choice::Agreed, now).unwrap();

        assert!(!link.open(now + Duration::days(30)).unwrap());
        assert_eq!(link.status, LinkStatus::Agreed);
    }

    #[test]
    fn authorize_requires_the_stored_token() {
        let mut link = sample_link(Utc::now());
        link.token = Some("abc".to_string());
        assert!(link.authorize("abc").is_ok());
        assert!(matches!(
            link.authorize("abd"),
            Err(ConsentError::TokenInvalid)
        ));

        link.token = None;
        assert!(link.authorize("abc").is_err());
    }
}
