//! Tests for run, status and the control subcommands.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_run() {
    match parse(&["cdl", "run"]) {
        CliCommand::Run { until_idle, json } => {
            assert!(!until_idle);
            assert!(!json);
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_flags() {
    match parse(&["cdl", "run", "--until-idle", "--json"]) {
        CliCommand::Run { until_idle, json } => {
            assert!(until_idle);
            assert!(json);
        }
        _ => panic!("expected Run with flags"),
    }
}

#[test]
fn cli_parse_status() {
    match parse(&["cdl", "status"]) {
        CliCommand::Status { id, user } => {
            assert!(id.is_none());
            assert!(user.is_none());
        }
        _ => panic!("expected Status"),
    }
    match parse(&["cdl", "status", "7", "--user", "ana"]) {
        CliCommand::Status { id, user } => {
            assert_eq!(id, Some(7));
            assert_eq!(user.as_deref(), Some("ana"));
        }
        _ => panic!("expected Status with id"),
    }
}

#[test]
fn cli_parse_pause() {
    match parse(&["cdl", "pause", "42"]) {
        CliCommand::Pause { id } => assert_eq!(id, 42),
        _ => panic!("expected Pause"),
    }
}

#[test]
fn cli_parse_resume() {
    match parse(&["cdl", "resume", "1"]) {
        CliCommand::Resume { id } => assert_eq!(id, 1),
        _ => panic!("expected Resume"),
    }
}

#[test]
fn cli_parse_cancel() {
    match parse(&["cdl", "cancel", "99"]) {
        CliCommand::Cancel { id } => assert_eq!(id, 99),
        _ => panic!("expected Cancel"),
    }
}

#[test]
fn cli_parse_retry() {
    match parse(&["cdl", "retry", "3"]) {
        CliCommand::Retry { id } => assert_eq!(id, 3),
        _ => panic!("expected Retry"),
    }
}

#[test]
fn cli_parse_pause_requires_numeric_id() {
    assert!(Cli::try_parse_from(["cdl", "pause", "abc"]).is_err());
    assert!(Cli::try_parse_from(["cdl", "pause"]).is_err());
}
