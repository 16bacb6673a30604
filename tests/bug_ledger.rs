use chrono::TimeDelta;

use obsmith::ledger::{BugKey, BugLedger};

fn ledger() -> BugLedger {
    let mut ledger = BugLedger::new();
    ledger.record(1064, "boom", "select 1");
    ledger.record(1064, "boom", "select 2");
    ledger.record(2013, "lost", "select 3");
    ledger
}

#[test]
fn identical_failures_share_one_entry() {
    let ledger = ledger();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger.total(), 3);
    let boom = ledger.get(1064, "boom").expect("recorded");
    assert_eq!(boom.count, 2);
    assert_eq!(boom.statements, vec!["select 1", "select 2"]);
}

#[test]
fn same_message_with_other_code_is_another_bug() {
    let mut ledger = ledger();
    ledger.record(1065, "boom", "select 4");
    assert_eq!(ledger.len(), 3);
    assert_eq!(ledger.get(1064, "boom").map(|r| r.count), Some(2));
}

#[test]
fn whitespace_does_not_split_a_bug() {
    let mut ledger = BugLedger::new();
    ledger.record(4016, "Internal error\n  at  plan", "select 1");
    ledger.record(4016, " Internal error at plan ", "select 2");
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.get(4016, "Internal error at plan").map(|r| r.count), Some(2));
}

#[test]
fn fingerprints_are_short_and_stable() {
    let a = BugKey::new(1064, "boom");
    let b = BugKey::new(1064, "boom ");
    let c = BugKey::new(1064, "bang");
    assert_eq!(a.fingerprint().len(), 12);
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(a.fingerprint(), c.fingerprint());
}

#[test]
fn summary_lists_every_bug() {
    let ledger = ledger();
    let mut out = Vec::new();
    ledger
        .write_summary(&mut out, TimeDelta::seconds(3725))
        .expect("summary");
    let text = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "bugs found: 3");
    assert_eq!(lines[1], "number\terr_no\ttype-of-error\tfingerprint");
    assert!(lines[2].starts_with("2\t1064\tboom\t"));
    assert!(lines[3].starts_with("1\t2013\tlost\t"));
    assert_eq!(lines[4], "elapsed: 01:02:05");
}

#[test]
fn report_file_groups_statements_by_bug() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bug_log.txt");
    ledger().persist(&path).expect("persist");
    let text = std::fs::read_to_string(&path).expect("read");
    assert_eq!(
        text,
        "err_no\terr_info\tsql_info\n\
         1064\tboom\tselect 1\n\n\
         1064\tboom\tselect 2\n\n\
         \n\n\
         2013\tlost\tselect 3\n\n\
         \n\n"
    );
}

#[test]
fn empty_ledger_still_writes_a_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bug_log.txt");
    std::fs::write(&path, "stale contents").expect("seed");
    BugLedger::new().persist(&path).expect("persist");
    assert_eq!(
        std::fs::read_to_string(&path).expect("read"),
        "err_no\terr_info\tsql_info\n"
    );
}
