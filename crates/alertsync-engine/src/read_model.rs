use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use alertsync_core::{CategoryToggles, Message, MessageId, Role};

use crate::policy::can_see_category;

/// Visible subset of `messages`, newest first.
///
/// A message is kept when the role may see its category, the display
/// filter for that category is on, and its body contains `search`
/// (case-insensitive; empty matches everything).
pub fn query<'a, I>(messages: I, search: &str, filters: &CategoryToggles, role: Role) -> Vec<Message>
where
    I: IntoIterator<Item = &'a Message>,
{
    let needle = search.trim().to_lowercase();
    let mut visible: Vec<Message> = messages
        .into_iter()
        .filter(|m| can_see_category(role, &m.category))
        .filter(|m| filters.get(&m.category))
        .filter(|m| needle.is_empty() || m.body.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    visible.sort_by(Message::feed_order);
    visible
}

/// Oldest timestamp among `messages`; the next page ends here.
pub fn load_more_cursor<'a, I>(messages: I) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = &'a Message>,
{
    messages.into_iter().map(|m| m.occurred_at).min()
}

/// Messages sharing a calendar day in the display time zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DaySection {
    pub date: NaiveDate,
    pub messages: Vec<Message>,
}

/// Group messages by local calendar day, newest day first.
pub fn group_by_day<Tz: TimeZone>(messages: &[Message], tz: &Tz) -> Vec<DaySection> {
    let mut ordered = messages.to_vec();
    ordered.sort_by(Message::feed_order);

    let mut sections: Vec<DaySection> = Vec::new();
    for message in ordered {
        let date = message.occurred_at.with_timezone(tz).date_naive();
        match sections.last_mut() {
            Some(section) if section.date == date => section.messages.push(message),
            _ => sections.push(DaySection {
                date,
                messages: vec![message],
            }),
        }
    }
    sections
}

/// Short-lived "just arrived" markers for live messages.
pub struct ArrivalDecorations {
    marked: DashMap<MessageId, Instant>,
    ttl: Duration,
}

impl ArrivalDecorations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            marked: DashMap::new(),
            ttl,
        }
    }

    pub fn mark(&self, id: MessageId) {
        self.marked.insert(id, Instant::now());
    }

    pub fn is_recent(&self, id: &MessageId) -> bool {
        let recent = self
            .marked
            .get(id)
            .is_some_and(|at| at.elapsed() < self.ttl);
        if !recent {
            self.marked.remove(id);
        }
        recent
    }

    /// Drop expired markers. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.marked.len();
        self.marked.retain(|_, at| at.elapsed() < self.ttl);
        before - self.marked.len()
    }

    pub fn clear(&self) {
        self.marked.clear();
    }

    pub fn len(&self) -> usize {
        self.marked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub message: Message,
    pub recently_arrived: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub online: bool,
    /// End of the next older page, if anything is held at all.
    pub cursor: Option<DateTime<Utc>>,
}

/// What the feed screen should render.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Feed {
    SignedOut,
    /// Subscription expired: show the renewal prompt instead of messages.
    Gated,
    Messages(FeedPage),
}

impl Feed {
    pub fn items(&self) -> &[FeedItem] {
        match self {
            Self::Messages(page) => &page.items,
            _ => &[],
        }
    }
}
