//! Plain-text rendering of the conversation view.

use std::collections::HashSet;

use chrono::Local;
use tokio::sync::watch;

use parlay_shared::UserId;
use parlay_store::{ConversationView, DeliveryStatus, ViewEntry};

/// One line per entry: time, author, body and delivery status.
pub fn line(index: usize, entry: &ViewEntry, local: &UserId) -> String {
    let time = entry.created_at().with_timezone(&Local).format("%H:%M");
    let author = if entry.sender_id() == local {
        "me"
    } else {
        entry.sender_id().as_str()
    };

    let mut body = String::new();
    if let Some(media) = entry.media() {
        body.push_str(media.kind.preview_label());
    }
    if let Some(text) = entry.text() {
        if !body.is_empty() {
            body.push(' ');
        }
        body.push_str(text);
    }

    let status = match entry.status() {
        DeliveryStatus::Delivered => "",
        DeliveryStatus::Sending => "  (sending)",
        DeliveryStatus::Failed => "  (failed, /retry to resend)",
    };
    format!("{index:>3} [{time}] {author}: {body}{status}")
}

pub fn print_view(view: &ConversationView, local: &UserId, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(view)?);
        return Ok(());
    }
    for (i, entry) in view.iter().enumerate() {
        println!("{}", line(i, entry, local));
    }
    Ok(())
}

/// Print lines as the view changes, skipping ones already shown.
pub async fn follow(mut rx: watch::Receiver<ConversationView>, local: UserId) {
    let mut shown = HashSet::new();
    loop {
        let view = rx.borrow_and_update().clone();
        for (i, entry) in view.iter().enumerate() {
            let text = line(i, entry, &local);
            if shown.insert(text.clone()) {
                println!("{text}");
            }
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}
