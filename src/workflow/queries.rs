use crate::shared::ClientError;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Validate,
    Preview,
}

impl QueryKind {
    fn call(self) -> &'static str {
        match self {
            QueryKind::Validate => "validate plan",
            QueryKind::Preview => "preview plan",
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryKind::Validate => write!(f, "validate"),
            QueryKind::Preview => write!(f, "preview"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome<T> {
    /// The response belonged to the latest request and is now displayed.
    Applied(T),
    /// A later request of the same kind was issued; the response was dropped.
    Superseded,
}

impl<T> QueryOutcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            QueryOutcome::Applied(value) => Some(value),
            QueryOutcome::Superseded => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, QueryOutcome::Superseded)
    }
}

/// Latest-wins slot for one query kind. Every request takes a ticket from a
/// monotonic counter; only the holder of the newest ticket may update the
/// displayed value.
#[derive(Debug, Clone)]
pub struct LatestResponse<T> {
    kind: QueryKind,
    issued: u64,
    current: Option<T>,
}

impl<T: Clone> LatestResponse<T> {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            issued: 0,
            current: None,
        }
    }

    pub fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    pub fn is_latest(&self, ticket: u64) -> bool {
        ticket == self.issued
    }

    pub fn accept(&mut self, ticket: u64, value: T) -> Result<T, ClientError> {
        self.check(ticket)?;
        self.current = Some(value.clone());
        Ok(value)
    }

    pub fn check(&self, ticket: u64) -> Result<(), ClientError> {
        if self.is_latest(ticket) {
            return Ok(());
        }
        Err(ClientError::StaleResponse {
            kind: self.kind,
            ticket,
            latest: self.issued,
        })
    }

    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Forgets the displayed value and outdates every ticket in flight.
    pub fn invalidate(&mut self) {
        self.issued += 1;
        self.current = None;
    }
}

/// A validate or preview call running on its own thread.
#[derive(Debug)]
pub struct PendingQuery<T> {
    kind: QueryKind,
    ticket: u64,
    handle: JoinHandle<Result<T, ClientError>>,
}

impl<T: Send + 'static> PendingQuery<T> {
    pub(crate) fn spawn<F>(kind: QueryKind, ticket: u64, call: F) -> Self
    where
        F: FnOnce() -> Result<T, ClientError> + Send + 'static,
    {
        Self {
            kind,
            ticket,
            handle: thread::spawn(call),
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub(crate) fn wait(self) -> (u64, Result<T, ClientError>) {
        let kind = self.kind;
        let result = self.handle.join().unwrap_or_else(|_| {
            Err(ClientError::Transport {
                call: kind.call().to_string(),
                status: None,
                reason: "query worker panicked".to_string(),
            })
        });
        (self.ticket, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_newest_ticket_updates_the_slot() {
        let mut slot = LatestResponse::new(QueryKind::Validate);
        let first = slot.issue();
        let second = slot.issue();

        assert_eq!(slot.accept(second, "second").expect("latest"), "second");
        let err = slot.accept(first, "first").expect_err("stale");
        assert!(matches!(
            err,
            ClientError::StaleResponse {
                kind: QueryKind::Validate,
                ticket: 1,
                latest: 2
            }
        ));
        assert_eq!(slot.current(), Some(&"second"));
    }

    #[test]
    fn invalidate_outdates_in_flight_tickets() {
        let mut slot = LatestResponse::new(QueryKind::Preview);
        let ticket = slot.issue();
        slot.accept(ticket, 7).expect("accept");
        let in_flight = slot.issue();
        slot.invalidate();
        assert!(slot.current().is_none());
        assert!(slot.check(in_flight).is_err());
    }

    #[test]
    fn pending_query_returns_its_ticket_and_result() {
        let pending = PendingQuery::spawn(QueryKind::Preview, 3, || Ok::<_, ClientError>(42));
        assert_eq!(pending.kind(), QueryKind::Preview);
        let (ticket, result) = pending.wait();
        assert_eq!(ticket, 3);
        assert_eq!(result.expect("ok"), 42);
    }
}
