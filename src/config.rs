use super::chain::{ApprovalPolicy, ChainConfig};
use super::error::LeaveError;
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_CHAIN: &str = "TeamLead,HR,MD";
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub chain: ChainConfig,
    pub policy: ApprovalPolicy,
    pub default_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("leave.db"),
            chain: ChainConfig::default(),
            policy: ApprovalPolicy::default(),
            default_page_size: 10,
        }
    }
}

impl Config {
    /// Reads `LEAVE_*` variables, loading a `.env` file first when present.
    pub fn from_env() -> Result<Self, LeaveError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, LeaveError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("LEAVE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let chain = ChainConfig::parse(
            &lookup("LEAVE_APPROVAL_CHAIN").unwrap_or_else(|| DEFAULT_CHAIN.to_string()),
        )
        .map_err(|e| LeaveError::Config(format!("LEAVE_APPROVAL_CHAIN: {}", e)))?;

        let policy = ApprovalPolicy {
            require_reject_comment: parse_flag(
                &lookup,
                "LEAVE_REQUIRE_REJECT_COMMENT",
                defaults.policy.require_reject_comment,
            )?,
            allow_self_approval: parse_flag(
                &lookup,
                "LEAVE_ALLOW_SELF_APPROVAL",
                defaults.policy.allow_self_approval,
            )?,
        };

        let default_page_size = match lookup("LEAVE_DEFAULT_PAGE_SIZE") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|e| LeaveError::Config(format!("LEAVE_DEFAULT_PAGE_SIZE: {}", e)))?
                .clamp(1, MAX_PAGE_SIZE),
            None => defaults.default_page_size,
        };

        Ok(Self {
            db_path,
            chain,
            policy,
            default_page_size,
        })
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, LeaveError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(LeaveError::Config(format!("{}: expected a boolean, got {:?}", key, other))),
        },
    }
}
