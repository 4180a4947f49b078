//! Summary composition.
//!
//! Pure text builders: given users, attributed completions and a window,
//! produce one [`SummaryMessage`] per recipient. Children get their own
//! recap; parents get one message covering every child.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregation::CompletedChore;
use crate::config::SummaryConfig;
use crate::ledger::{Role, User, UserId, format_date};

/// A composed message ready for the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Allowance earned for `points` at `rate` per point.
pub fn allowance(points: i64, rate: f64) -> f64 {
    points as f64 * rate
}

fn by_user(completions: &[CompletedChore]) -> HashMap<UserId, Vec<&CompletedChore>> {
    let mut map: HashMap<UserId, Vec<&CompletedChore>> = HashMap::new();
    for c in completions {
        map.entry(c.user_id).or_default().push(c);
    }
    map
}

fn children(users: &[User]) -> impl Iterator<Item = &User> {
    users.iter().filter(|u| u.role == Role::Child)
}

/// Compose the daily recap for `date`. `completions` should cover `date` only.
pub fn compose_daily(
    users: &[User],
    completions: &[CompletedChore],
    date: NaiveDate,
    config: &SummaryConfig,
) -> Vec<SummaryMessage> {
    let grouped = by_user(completions);
    let subject = format!("{} ({})", config.daily_subject, format_date(date));

    users
        .iter()
        .map(|user| {
            let mut body = String::new();
            match user.role {
                Role::Child => {
                    let _ = writeln!(body, "Hello {},\n", user.username);
                    match grouped.get(&user.id) {
                        Some(chores) => {
                            body.push_str("Here are the chores you completed today:\n");
                            write_daily_block(&mut body, user, chores);
                        }
                        None => {
                            body.push_str("You did not complete any chores today.\n");
                            let _ = writeln!(body, "Current point total: {}", user.points);
                        }
                    }
                }
                Role::Parent => {
                    let _ = writeln!(body, "Hello {},\n", user.username);
                    body.push_str("Here is the summary of completed chores today:\n");
                    for child in children(users) {
                        let _ = writeln!(body, "\n{}:", child.username);
                        match grouped.get(&child.id) {
                            Some(chores) => write_daily_block(&mut body, child, chores),
                            None => {
                                body.push_str("No chores completed today.\n");
                                let _ = writeln!(body, "Current point total: {}", child.points);
                            }
                        }
                    }
                }
            }
            SummaryMessage {
                to: user.email.clone(),
                subject: subject.clone(),
                body,
            }
        })
        .collect()
}

fn write_daily_block(body: &mut String, user: &User, chores: &[&CompletedChore]) {
    for chore in chores {
        let _ = writeln!(body, "- {} ({} points)", chore.chore_name, chore.points);
    }
    let earned: i64 = chores.iter().map(|c| c.points).sum();
    let _ = writeln!(body, "\nTotal points earned today: {earned}");
    let _ = writeln!(body, "Current point total: {}", user.points);
}

/// Compose the weekly recap for the window `start..=end`.
pub fn compose_weekly(
    users: &[User],
    completions: &[CompletedChore],
    start: NaiveDate,
    end: NaiveDate,
    config: &SummaryConfig,
) -> Vec<SummaryMessage> {
    let grouped = by_user(completions);
    let subject = format!(
        "{} ({} to {})",
        config.weekly_subject,
        format_date(start),
        format_date(end)
    );

    users
        .iter()
        .map(|user| {
            let mut body = String::new();
            let _ = writeln!(body, "Hello {},\n", user.username);
            match user.role {
                Role::Child => match grouped.get(&user.id) {
                    Some(chores) => {
                        body.push_str("Here are the chores you completed this week:\n\n");
                        write_weekly_block(&mut body, chores, config);
                    }
                    None => body.push_str("You did not complete any chores this week.\n"),
                },
                Role::Parent => {
                    body.push_str("Here is the summary of completed chores this week:\n\n");
                    for child in children(users) {
                        let _ = writeln!(body, "{}:", child.username);
                        match grouped.get(&child.id) {
                            Some(chores) => {
                                write_weekly_block(&mut body, chores, config);
                                body.push('\n');
                            }
                            None => body.push_str("No chores completed this week.\n\n"),
                        }
                    }
                }
            }
            SummaryMessage {
                to: user.email.clone(),
                subject: subject.clone(),
                body,
            }
        })
        .collect()
}

fn write_weekly_block(body: &mut String, chores: &[&CompletedChore], config: &SummaryConfig) {
    let mut per_date: BTreeMap<NaiveDate, Vec<&CompletedChore>> = BTreeMap::new();
    for chore in chores {
        per_date.entry(chore.date).or_default().push(chore);
    }

    let mut subtotal = 0;
    for (date, day) in &per_date {
        let _ = writeln!(body, "{}:", format_date(*date));
        for chore in day {
            let _ = writeln!(body, "- {} ({} points)", chore.chore_name, chore.points);
            subtotal += chore.points;
        }
        body.push('\n');
    }
    let _ = writeln!(body, "Total points earned this week: {subtotal}");
    let _ = writeln!(
        body,
        "Total allowance earned this week: {}{:.2}",
        config.currency_symbol,
        allowance(subtotal, config.allowance_per_point)
    );
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::ledger::parse_date;

    fn user(id: UserId, name: &str, role: Role, points: i64) -> User {
        User {
            id,
            username: name.to_owned(),
            credential_hash: String::new(),
            email: format!("{}@example.org", name.to_lowercase()),
            role,
            points,
        }
    }

    fn done(user_id: UserId, name: &str, points: i64, date: &str) -> CompletedChore {
        CompletedChore {
            user_id,
            chore_id: 0,
            chore_name: name.to_owned(),
            points,
            date: parse_date(date).unwrap(),
        }
    }

    fn household() -> Vec<User> {
        vec![
            user(1, "Bolte", Role::Parent, 0),
            user(2, "Max", Role::Child, 15),
            user(3, "Moritz", Role::Child, 6),
        ]
    }

    #[test]
    fn daily_sends_one_message_per_user() {
        let users = household();
        let completions = vec![done(2, "walk dog morning", 5, "2024-01-01")];
        let msgs = compose_daily(
            &users,
            &completions,
            parse_date("2024-01-01").unwrap(),
            &SummaryConfig::default(),
        );
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1].to, "max@example.org");
        assert_eq!(msgs[1].subject, "Daily Chore Summary (2024-01-01)");
        assert!(msgs[1].body.contains("- walk dog morning (5 points)"));
        assert!(msgs[1].body.contains("Current point total: 15"));
        assert!(msgs[2].body.contains("You did not complete any chores today."));
    }

    #[test]
    fn daily_parent_message_covers_every_child() {
        let users = household();
        let completions = vec![done(3, "Cat litter cleanup", 1, "2024-01-01")];
        let msgs = compose_daily(
            &users,
            &completions,
            parse_date("2024-01-01").unwrap(),
            &SummaryConfig::default(),
        );
        let parent = &msgs[0].body;
        assert!(parent.contains("Max:\nNo chores completed today."));
        assert!(parent.contains("Moritz:\n- Cat litter cleanup (1 points)"));
    }

    #[test]
    fn weekly_lists_dates_in_order_with_allowance() {
        let users = household();
        let completions = vec![
            done(2, "walk dog evening", 5, "2024-01-05"),
            done(2, "walk dog morning", 5, "2024-01-02"),
            done(2, "walk dog afternoon", 5, "2024-01-02"),
        ];
        let msgs = compose_weekly(
            &users,
            &completions,
            parse_date("2024-01-01").unwrap(),
            parse_date("2024-01-07").unwrap(),
            &SummaryConfig::default(),
        );
        let max = &msgs[1].body;
        let first = max.find("2024-01-02:").unwrap();
        let second = max.find("2024-01-05:").unwrap();
        assert!(first < second);
        assert!(max.contains("Total points earned this week: 15"));
        assert!(max.contains("Total allowance earned this week: $1.50"));
        assert!(msgs[2].body.contains("You did not complete any chores this week."));
    }

    #[test]
    fn weekly_parent_aggregates_children() {
        let users = household();
        let completions = vec![
            done(2, "walk dog morning", 5, "2024-01-02"),
            done(3, "Cat litter cleanup", 1, "2024-01-03"),
        ];
        let config = SummaryConfig {
            allowance_per_point: 0.25,
            currency_symbol: "€".to_owned(),
            ..SummaryConfig::default()
        };
        let msgs = compose_weekly(
            &users,
            &completions,
            parse_date("2024-01-01").unwrap(),
            parse_date("2024-01-07").unwrap(),
            &config,
        );
        let parent = &msgs[0].body;
        assert!(parent.contains("Max:"));
        assert!(parent.contains("Total allowance earned this week: €1.25"));
        assert!(parent.contains("Total allowance earned this week: €0.25"));
        assert_eq!(msgs[0].subject, "Weekly Chore Summary (2024-01-01 to 2024-01-07)");
    }

    #[test]
    fn allowance_uses_rate() {
        assert!((allowance(37, 0.1) - 3.7).abs() < 1e-9);
        assert_eq!(allowance(0, 0.1), 0.0);
    }
}
