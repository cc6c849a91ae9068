//! Staff notification messages and fire-and-forget delivery

use std::sync::Arc;

use chrono::NaiveDate;

use super::telegram::Notifier;
use crate::models::borrowing::OverdueBorrowing;

#[derive(Clone)]
pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
}

impl NotificationService {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Send in the background. Delivery failures are logged and never reach
    /// the caller.
    pub fn notify(&self, text: String) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_message(&text).await {
                tracing::warn!(error = %e, "Failed to deliver staff notification");
            }
        });
    }

    /// Send and wait for delivery, still swallowing failures
    pub async fn notify_now(&self, text: &str) {
        if let Err(e) = self.notifier.send_message(text).await {
            tracing::warn!(error = %e, "Failed to deliver staff notification");
        }
    }
}

pub fn new_borrowing_message(user_email: &str, book_title: &str, expected_return: NaiveDate) -> String {
    format!(
        "📚 New borrowing created!\n\n👤 User: {}\n📖 Book: {}\n📅 Expected return: {}",
        user_email, book_title, expected_return
    )
}

/// Daily overdue report, one block per borrowing
pub fn overdue_report_message(today: NaiveDate, overdue: &[OverdueBorrowing]) -> String {
    let mut lines = vec![format!("#borrowings_overdue\n{}\n", today)];

    if overdue.is_empty() {
        lines.push("No borrowings overdue today!".to_string());
    }
    for borrowing in overdue {
        let days = (today - borrowing.expected_return_date).num_days();
        lines.push(format!(
            "borrowing_id: {}\nuser_email: {}\nbook: {}\noverdue: {} days\n",
            borrowing.id, borrowing.user_email, borrowing.book_title, days
        ));
    }

    lines.join("\n")
}
