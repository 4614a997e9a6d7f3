use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::model::{MessageRecord, Turn};

static NEWLINE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").expect("valid regex"));

/// Pairs user messages with the assistant messages that follow them.
///
/// Uses a single forward pass over the assistant list when every message has
/// a comparable anchor. Otherwise user `i` is paired with assistant `i`.
/// `None` entries in either list are ignored.
pub fn pair_messages_by_order<U, A>(user_messages: U, assistant_messages: A) -> Vec<Turn>
where
    U: IntoIterator,
    U::Item: Into<Option<MessageRecord>>,
    A: IntoIterator,
    A::Item: Into<Option<MessageRecord>>,
{
    let users = user_messages
        .into_iter()
        .filter_map(Into::into)
        .collect::<Vec<MessageRecord>>();
    let assistants = assistant_messages
        .into_iter()
        .filter_map(Into::into)
        .collect::<Vec<MessageRecord>>();

    if users.is_empty() {
        return Vec::new();
    }

    if !can_use_order_pairing(&users, &assistants) {
        debug!(
            users = users.len(),
            assistants = assistants.len(),
            "message anchors not comparable, pairing by index"
        );
        return pair_by_index(users, assistants);
    }

    let mut turns = Vec::with_capacity(users.len());
    let mut assistants = assistants.into_iter().peekable();
    let mut users = users.into_iter().peekable();

    while let Some(user) = users.next() {
        let next_user = users.peek();
        let mut segments = Vec::new();

        while let Some(candidate) = assistants.peek() {
            match compare_messages(&user, candidate) {
                Some(Ordering::Less) => {}
                Some(_) => {
                    assistants.next();
                    continue;
                }
                None => {
                    debug!(
                        user_id = %user.id,
                        assistant_id = %candidate.id,
                        "assistant order undecidable, dropping from turn"
                    );
                    assistants.next();
                    continue;
                }
            }

            if next_user.is_some_and(|next| !is_message_before(candidate, next)) {
                break;
            }

            segments.extend(assistants.next());
        }

        turns.push(build_turn(user, segments));
    }

    turns
}

fn pair_by_index(users: Vec<MessageRecord>, assistants: Vec<MessageRecord>) -> Vec<Turn> {
    let mut assistants = assistants.into_iter();
    users
        .into_iter()
        .map(|user| build_turn(user, assistants.next().into_iter().collect()))
        .collect()
}

pub fn can_use_order_pairing(users: &[MessageRecord], assistants: &[MessageRecord]) -> bool {
    if assistants.is_empty() {
        return true;
    }

    users.iter().all(MessageRecord::has_comparable_anchor)
        && assistants.iter().all(MessageRecord::has_comparable_anchor)
}

/// Orders two messages by numeric `order` when both have one, otherwise by
/// element position. `None` when neither works.
pub fn compare_messages(left: &MessageRecord, right: &MessageRecord) -> Option<Ordering> {
    if let (Some(left_order), Some(right_order)) = (left.order, right.order) {
        return Some(left_order.cmp(&right_order));
    }

    let left_position = left.element.as_ref()?.document_position()?;
    let right_position = right.element.as_ref()?.document_position()?;
    left_position.compare(&right_position)
}

pub fn is_message_before(left: &MessageRecord, right: &MessageRecord) -> bool {
    compare_messages(left, right) == Some(Ordering::Less)
}

pub fn build_turn(user: MessageRecord, assistant_segments: Vec<MessageRecord>) -> Turn {
    let user = normalize_message(user);
    let assistant_segments = assistant_segments
        .into_iter()
        .map(normalize_message)
        .collect::<Vec<_>>();
    let assistant_text = assistant_segments
        .iter()
        .map(|segment| segment.text.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    Turn {
        id: user.id.clone(),
        user,
        assistant_segments,
        assistant_text,
    }
}

fn normalize_message(mut message: MessageRecord) -> MessageRecord {
    message.text = normalize_message_text(&message.text);
    message
}

pub fn normalize_message_text(text: &str) -> String {
    NEWLINE_RUN_RE.replace_all(text.trim(), "\n").into_owned()
}
