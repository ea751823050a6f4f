//! Page traversal for collection requests.
//!
//! A [`Pagination`] is the per-manager strategy; [`Pagination::cursor`]
//! starts a fresh [`PageCursor`] for each `filter` call, so no traversal
//! state outlives the call that created it.

use serde_json::Value;

/// How a collection endpoint spreads records over pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pagination {
    /// The first response holds every record.
    #[default]
    SinglePage,
    /// Each page carries the absolute URL of the following one in `next`.
    NextLink,
}

impl Pagination {
    /// Cursor starting at `initial_url`.
    ///
    /// `base_url` is stripped from next links so that they can be sent as
    /// relative paths through the client.
    pub fn cursor(self, base_url: &str, initial_url: &str) -> PageCursor {
        PageCursor {
            strategy: self,
            base_url: base_url.to_string(),
            state: CursorState::Pending(PageRequest {
                url: initial_url.to_string(),
                params: Vec::new(),
            }),
        }
    }
}

/// One request the manager has to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    /// Paging parameters, merged over the caller's query.
    pub params: Vec<(String, String)>,
}

impl PageRequest {
    /// `query` merged with this page's parameters.
    ///
    /// Page parameters win, and keys already in the page URL's own query
    /// string are not repeated.
    pub fn merge_query(&self, query: &[(String, String)]) -> Vec<(String, String)> {
        let carried: Vec<String> = match self.url.split_once('?') {
            Some((_, existing)) => url::form_urlencoded::parse(existing.as_bytes())
                .map(|(k, _)| k.into_owned())
                .collect(),
            None => Vec::new(),
        };
        let mut merged: Vec<(String, String)> = query
            .iter()
            .filter(|(k, _)| !carried.contains(k) && !self.params.iter().any(|(p, _)| p == k))
            .cloned()
            .collect();
        merged.extend(self.params.iter().cloned());
        merged
    }
}

#[derive(Debug)]
enum CursorState {
    Pending(PageRequest),
    InFlight(String),
    Exhausted,
}

#[derive(Debug)]
pub struct PageCursor {
    strategy: Pagination,
    base_url: String,
    state: CursorState,
}

impl PageCursor {
    /// The next request, or `None` once exhausted.
    ///
    /// After a request has been handed out, the cursor waits for
    /// [`process_response`](Self::process_response) before yielding another.
    pub fn next_page(&mut self) -> Option<PageRequest> {
        match std::mem::replace(&mut self.state, CursorState::Exhausted) {
            CursorState::Pending(request) => {
                self.state = CursorState::InFlight(request.url.clone());
                Some(request)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Feed the body of the page last returned by `next_page`.
    pub fn process_response(&mut self, body: Option<&Value>) {
        let current = match std::mem::replace(&mut self.state, CursorState::Exhausted) {
            CursorState::InFlight(url) => url,
            other => {
                self.state = other;
                return;
            }
        };
        if self.strategy == Pagination::SinglePage {
            return;
        }

        let next = body
            .and_then(|b| b.get("next"))
            .and_then(Value::as_str)
            .filter(|next| !next.is_empty());
        let Some(next) = next else { return };

        let url = next.strip_prefix(self.base_url.as_str()).unwrap_or(next);
        if url == current || next == current {
            tracing::debug!(url, "next link points back at the current page");
            return;
        }
        self.state = CursorState::Pending(PageRequest {
            url: url.to_string(),
            params: Vec::new(),
        });
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Exhausted)
    }
}
