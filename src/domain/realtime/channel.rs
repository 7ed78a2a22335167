//! Broker channels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Logical channel an envelope is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Homework,
    AnalysisProgress,
    Notification,
    Lesson,
    System,
    Presence,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Homework,
        Channel::AnalysisProgress,
        Channel::Notification,
        Channel::Lesson,
        Channel::System,
        Channel::Presence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Homework => "homework",
            Channel::AnalysisProgress => "analysis-progress",
            Channel::Notification => "notification",
            Channel::Lesson => "lesson",
            Channel::System => "system",
            Channel::Presence => "presence",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| {
                ValidationError::invalid_format("channel", format!("unknown channel '{}'", s))
            })
    }
}
