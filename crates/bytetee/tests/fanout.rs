#![cfg(test)]

use std::time::Duration;

use bytetee::{Branch, BranchOptions, TeeOptions, tee};
use bytetee_test_utils::{MemorySource, ScriptedSource};
use rstest::rstest;

fn collect_branch() -> Branch<Vec<u8>> {
    Branch::new(|mut reader, _cancel| async move {
        let data = reader.read_to_end().await?;
        Ok(data)
    })
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn single_branch_observes_whole_payload() {
    let results = tee(
        MemorySource::new(&b"Test Value"[..]),
        TeeOptions::default(),
        vec![collect_branch()],
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_deref().unwrap(), b"Test Value");
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn all_branches_observe_identical_payload() {
    let results = tee(
        MemorySource::new(&b"Test Value"[..]),
        TeeOptions::default(),
        vec![collect_branch(), collect_branch()],
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_deref().unwrap(), b"Test Value");
    assert_eq!(results[1].as_deref().unwrap(), b"Test Value");
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn quota_clips_one_branch_without_affecting_siblings() {
    let limited = collect_branch().with_options(BranchOptions {
        max_bytes: Some(4),
        ..BranchOptions::default()
    });

    let results = tee(
        MemorySource::new(&b"Test Value"[..]),
        TeeOptions::default(),
        vec![limited, collect_branch()],
    )
    .await
    .unwrap();

    assert_eq!(results[0].as_deref().unwrap(), b"Test");
    assert_eq!(results[1].as_deref().unwrap(), b"Test Value");
}

#[rstest]
#[case(vec!["Test Value"])]
#[case(vec!["Te", "st ", "Valu", "e"])]
#[case(vec!["T", "e", "s", "t", " ", "V", "a", "l", "u", "e"])]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn chunked_arrival_reassembles_exactly(#[case] chunks: Vec<&'static str>) {
    let results = tee(
        ScriptedSource::new(chunks),
        TeeOptions::default(),
        vec![collect_branch(), collect_branch()],
    )
    .await
    .unwrap();

    for result in results {
        assert_eq!(result.as_deref().unwrap(), b"Test Value");
    }
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn results_align_with_branch_order() {
    let branch_with_quota = |quota| {
        collect_branch().with_options(BranchOptions {
            max_bytes: Some(quota),
            ..BranchOptions::default()
        })
    };

    let results = tee(
        MemorySource::new(&b"abcdefgh"[..]),
        TeeOptions::default(),
        vec![
            branch_with_quota(1),
            branch_with_quota(2),
            branch_with_quota(3),
        ],
    )
    .await
    .unwrap();

    assert_eq!(results[0].as_deref().unwrap(), b"a");
    assert_eq!(results[1].as_deref().unwrap(), b"ab");
    assert_eq!(results[2].as_deref().unwrap(), b"abc");
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn consumer_may_stop_reading_early() {
    let quitter: Branch<Vec<u8>> = Branch::new(|mut reader, _cancel| async move {
        let first = reader.next_chunk().await?.unwrap_or_default();
        // Dropping the reader here is a voluntary exit, not a failure.
        Ok(first.to_vec())
    });

    let results = tee(
        ScriptedSource::new(vec!["Test", " Value"]),
        TeeOptions {
            min_fill: None,
            ..TeeOptions::default()
        },
        vec![quitter, collect_branch()],
    )
    .await
    .unwrap();

    assert_eq!(results[0].as_deref().unwrap(), b"Test");
    assert_eq!(results[1].as_deref().unwrap(), b"Test Value");
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn unit_branches_report_completion() {
    let drain = || {
        Branch::new(|mut reader, _cancel| async move {
            reader.read_to_end().await?;
            Ok(())
        })
    };

    let results = tee(
        MemorySource::new(&b"Test Value"[..]),
        TeeOptions::default(),
        vec![drain(), drain()],
    )
    .await
    .unwrap();

    assert_eq!(results, vec![Some(()), Some(())]);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn source_reads_stop_once_every_branch_is_done() {
    let mut source = ScriptedSource::new(vec!["aaaaaaaa", "bbbbbbbb", "cccccccc"]);
    let limited = collect_branch().with_options(BranchOptions {
        max_bytes: Some(4),
        ..BranchOptions::default()
    });

    let results = tee(
        &mut source,
        TeeOptions {
            min_fill: None,
            ..TeeOptions::default()
        },
        vec![limited],
    )
    .await
    .unwrap();

    assert_eq!(results[0].as_deref().unwrap(), b"aaaa");
    // The remaining schedule was never requested.
    assert_eq!(source.unrevealed(), 2);
}
