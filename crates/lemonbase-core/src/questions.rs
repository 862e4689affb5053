// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The question bank backing the quiz challenge engine.
//!
//! A built-in seed set ships with the engine so a fresh deployment can hand
//! out quizzes immediately; the store abstraction allows an external bank.
//! The correct option index lives only server-side and is never part of a
//! start-quiz response.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Question difficulty tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Entry-level questions.
    Easy,
    /// Standard questions.
    Normal,
}

impl Difficulty {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Normal => "normal",
        }
    }

    /// Parse the storage string form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "easy" => Ok(Self::Easy),
            "normal" => Ok(Self::Normal),
            other => Err(Error::Other(format!("unknown difficulty '{}'", other))),
        }
    }
}

/// Question topic categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Database fundamentals.
    Basics,
    /// SQL querying.
    Sql,
    /// Schema and system design.
    Design,
}

impl Category {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basics => "basics",
            Self::Sql => "sql",
            Self::Design => "design",
        }
    }

    /// Parse the storage string form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "basics" => Ok(Self::Basics),
            "sql" => Ok(Self::Sql),
            "design" => Ok(Self::Design),
            other => Err(Error::Other(format!("unknown category '{}'", other))),
        }
    }
}

/// A quiz question.
#[derive(Debug, Clone)]
pub struct Question {
    /// Unique question identifier.
    pub question_id: Uuid,
    /// The question text shown to the player.
    pub prompt: String,
    /// Answer options, in display order.
    pub options: Vec<String>,
    /// Index into `options` of the correct answer. Never sent to clients
    /// before the attempt is terminal.
    pub correct_option: i32,
    /// Difficulty tier.
    pub difficulty: Difficulty,
    /// Topic category.
    pub category: Category,
    /// Seconds the player has to answer.
    pub time_limit_secs: i64,
}

impl Question {
    /// Whether the given option index is the correct answer.
    pub fn check_answer(&self, option_index: i32) -> bool {
        option_index == self.correct_option
    }
}

fn question(
    prompt: &str,
    options: &[&str],
    correct_option: i32,
    difficulty: Difficulty,
    category: Category,
) -> Question {
    Question {
        question_id: Uuid::new_v4(),
        prompt: prompt.to_string(),
        options: options.iter().map(|s| s.to_string()).collect(),
        correct_option,
        difficulty,
        category,
        time_limit_secs: 15,
    }
}

/// The built-in seed bank.
pub fn seed_bank() -> Vec<Question> {
    vec![
        question(
            "Which of these is a key-value store often used as a cache?",
            &["PostgreSQL", "Redis", "Cassandra", "Neo4j"],
            1,
            Difficulty::Easy,
            Category::Basics,
        ),
        question(
            "What does ACID stand for in database transactions?",
            &[
                "Atomicity, Consistency, Isolation, Durability",
                "Availability, Consistency, Integrity, Durability",
                "Atomicity, Concurrency, Integrity, Distribution",
                "Access, Control, Isolation, Delivery",
            ],
            0,
            Difficulty::Easy,
            Category::Basics,
        ),
        question(
            "In MongoDB, data is primarily stored as what?",
            &["Tables and rows", "BSON documents", "Triples", "Column families"],
            1,
            Difficulty::Easy,
            Category::Basics,
        ),
        question(
            "Which SQL clause filters rows after aggregation?",
            &["WHERE", "GROUP BY", "HAVING", "ORDER BY"],
            2,
            Difficulty::Normal,
            Category::Sql,
        ),
        question(
            "Which JOIN returns all rows from the left table and matching rows from the right?",
            &["INNER JOIN", "LEFT JOIN", "RIGHT JOIN", "CROSS JOIN"],
            1,
            Difficulty::Easy,
            Category::Sql,
        ),
        question(
            "What does a database index primarily speed up?",
            &["Writes", "Reads", "Backups", "Replication"],
            1,
            Difficulty::Easy,
            Category::Basics,
        ),
        question(
            "What is the purpose of a replica set in MongoDB?",
            &[
                "Sharding data across nodes",
                "High availability through redundancy",
                "Compressing documents",
                "Enforcing schemas",
            ],
            1,
            Difficulty::Normal,
            Category::Design,
        ),
        question(
            "Which normal form removes transitive dependencies?",
            &["1NF", "2NF", "3NF", "BCNF"],
            2,
            Difficulty::Normal,
            Category::Design,
        ),
        question(
            "Redis persists data to disk using which mechanisms?",
            &[
                "WAL and MVCC",
                "RDB snapshots and AOF logs",
                "SSTables and memtables",
                "Undo and redo logs",
            ],
            1,
            Difficulty::Normal,
            Category::Basics,
        ),
        question(
            "Which isolation level prevents dirty reads but allows non-repeatable reads?",
            &[
                "Read Uncommitted",
                "Read Committed",
                "Repeatable Read",
                "Serializable",
            ],
            1,
            Difficulty::Normal,
            Category::Sql,
        ),
        question(
            "In CAP terms, what does a system give up to stay available during a partition?",
            &["Latency", "Consistency", "Durability", "Throughput"],
            1,
            Difficulty::Normal,
            Category::Design,
        ),
        question(
            "What is denormalization typically used for?",
            &[
                "Reducing storage size",
                "Improving read performance",
                "Enforcing referential integrity",
                "Preventing deadlocks",
            ],
            1,
            Difficulty::Normal,
            Category::Design,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_bank_is_well_formed() {
        let bank = seed_bank();
        assert!(bank.len() >= 10);
        for q in &bank {
            assert!(!q.prompt.is_empty());
            assert!(q.options.len() >= 2);
            assert!(q.correct_option >= 0);
            assert!((q.correct_option as usize) < q.options.len());
            assert!(q.time_limit_secs > 0);
        }
    }

    #[test]
    fn check_answer_matches_only_the_correct_index() {
        let q = &seed_bank()[0];
        assert!(q.check_answer(q.correct_option));
        assert!(!q.check_answer(q.correct_option + 1));
    }

    #[test]
    fn enums_round_trip_through_storage_form() {
        assert_eq!(Difficulty::parse("easy").unwrap(), Difficulty::Easy);
        assert_eq!(Category::parse("design").unwrap(), Category::Design);
        assert!(Difficulty::parse("brutal").is_err());
        assert!(Category::parse("trivia").is_err());
    }
}
