// Copyright 2026 The stonelog Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use stonelog::service::GeneralConfig;
use stonelog::{
    AppError, IntegrityErrorKind, Message, MessageStore, StoreConfig, Topic, TopicSettings,
};

fn store_config(data_dir: &std::path::Path) -> StoreConfig {
    StoreConfig {
        general: GeneralConfig {
            data_dir: data_dir.to_string_lossy().into_owned(),
            monitor_interval: None,
        },
        ..Default::default()
    }
}

async fn open_store(data_dir: &std::path::Path) -> Arc<MessageStore> {
    MessageStore::open(store_config(data_dir)).await.unwrap()
}

fn cancel_after(d: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(d).await;
        t.cancel();
    });
    token
}

fn write_payload(t: &Topic, payload: &[u8]) {
    let m = Message::from_payload(payload);
    t.write(m.bytes()).unwrap();
}

#[tokio::test]
async fn ingest_read_round_trip() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let t = store
        .create_topic("events", TopicSettings::default())
        .await
        .unwrap();

    for i in 0..5 {
        write_payload(&t, format!("event number {i}").as_bytes());
    }

    for i in 0..5 {
        let p = t.payload(i).unwrap();
        assert_eq!(&p[..], format!("event number {i}").as_bytes());
    }
    assert!(matches!(t.payload(99), Err(AppError::OffsetNotFound)));
}

#[tokio::test]
async fn offset_parsing() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let t = store
        .create_topic("parse", TopicSettings::default())
        .await
        .unwrap();

    // empty topic edges first
    assert_eq!(t.parse_offset("last").unwrap(), -1);
    assert_eq!(t.parse_offset("end").unwrap(), 0);

    // 20 messages written over two seconds
    for i in 0..20 {
        write_payload(&t, format!("m{i}").as_bytes());
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(t.parse_offset("3").unwrap(), 3);
    assert_eq!(t.parse_offset("first").unwrap(), 0);
    assert_eq!(t.parse_offset("beginning").unwrap(), 0);
    assert_eq!(t.parse_offset("").unwrap(), 0);
    assert_eq!(t.parse_offset("last").unwrap(), 19);
    assert_eq!(t.parse_offset("LATEST").unwrap(), 19);
    assert_eq!(t.parse_offset("end").unwrap(), 20);
    assert_eq!(t.parse_offset("now").unwrap(), 20);

    assert!(matches!(
        t.parse_offset("2a2"),
        Err(AppError::InvalidOffset)
    ));

    // everything was written within the last 10 seconds
    assert_eq!(t.parse_offset("10s").unwrap(), 0);

    // roughly the second half of the writes happened in the last second;
    // index timestamps have second granularity, so just pin the shape
    let recent = t.parse_offset("1s").unwrap();
    assert!(recent > 0 && recent < 20, "got {recent}");
}

#[tokio::test]
async fn batched_scan_interleaving() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let t = store
        .create_topic("batched", TopicSettings::default())
        .await
        .unwrap();

    let msgs: Vec<Message> = (0..12)
        .map(|i| Message::from_payload(format!("m{i}").as_bytes()))
        .collect();
    let mut concat = Vec::new();
    for m in &msgs {
        concat.extend_from_slice(m.bytes());
    }

    // interleave single messages with raw 12-message sets
    for m in &msgs {
        t.write(m.bytes()).unwrap();
        t.write_n(&concat, 12).unwrap();
    }

    // offsets: 0 = m0, 1..=12 = m0..m11, 13 = m1, 14..=25 = m0..m11, ...
    let sc = t.new_scanner(0, false).await.unwrap();
    let cancel = CancellationToken::new();

    let mut expect = Vec::new();
    expect.push((0i64, 0usize)); // offset, index into msgs
    for i in 0..12usize {
        expect.push((1 + i as i64, i));
    }
    expect.push((13, 1));
    for i in 0..12usize {
        expect.push((14 + i as i64, i));
    }

    for (offset, mi) in expect {
        let (m, o) = sc.scan(&cancel).await.unwrap();
        assert_eq!(o, offset);
        assert_eq!(m.payload(), msgs[mi].payload(), "at offset {offset}");
    }

    // starting embedded inside the first message-set
    let sc = t.new_scanner(3, false).await.unwrap();
    let (m, o) = sc.scan(&cancel).await.unwrap();
    assert_eq!(o, 3);
    assert_eq!(m.payload(), b"m2");
}

#[tokio::test]
async fn integrity_check_finds_corruptions() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let t = store
        .create_topic("damaged", TopicSettings::default())
        .await
        .unwrap();

    // ten equally sized messages: payload "payload-N" = 9 bytes, so
    // every stored frame is 18 bytes
    for i in 0..10 {
        write_payload(&t, format!("payload-{i}").as_bytes());
    }

    let data_path = t.dir_path().join(format!("{:020}.data", 0));
    let f = OpenOptions::new().write(true).open(&data_path).unwrap();

    // corrupt the length header of offset 4 to claim 20 bytes
    f.write_all_at(&20u32.to_be_bytes(), 4 * 18 + 5).unwrap();
    // corrupt the crc header of offset 7
    f.write_all_at(&0xdeadbeefu32.to_be_bytes(), 7 * 18 + 1)
        .unwrap();

    let cancel = CancellationToken::new();
    let errors = t.check_integrity(&cancel, 0).unwrap();

    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].offset, 4);
    assert_eq!(errors[0].kind, IntegrityErrorKind::Length);
    assert_eq!(errors[0].expected, "20");
    assert_eq!(errors[0].actual, "9");

    assert_eq!(errors[1].offset, 7);
    assert_eq!(errors[1].kind, IntegrityErrorKind::Checksum);
}

#[tokio::test]
async fn tail_follow() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let t = store
        .create_topic("tail", TopicSettings::default())
        .await
        .unwrap();

    // an empty topic times out with end of topic
    let sc = t.new_scanner(0, false).await.unwrap();
    let start = std::time::Instant::now();
    let res = sc.scan(&cancel_after(Duration::from_secs(1))).await;
    assert!(matches!(res, Err(AppError::EndOfTopic)));
    assert!(start.elapsed() >= Duration::from_millis(900));

    // a producer that shows up mid-wait wakes the scanner
    let producer = Arc::clone(&t);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        write_payload(&producer, b"fresh data");
    });

    let (m, offset) = sc
        .scan(&cancel_after(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(offset, 0);
    assert_eq!(m.payload(), b"fresh data");
}

#[tokio::test]
async fn topic_batching_packs_and_reads_back() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let settings = TopicSettings {
        batch_num_messages: 5,
        compression_type: 2, // gzip
        ..Default::default()
    };
    let t = store.create_topic("packed", settings).await.unwrap();

    for i in 0..13 {
        write_payload(&t, format!("batched payload {i}").as_bytes());
    }

    // two batches of five landed, ten offsets reserved, three buffered
    let info = t.info().unwrap();
    assert_eq!(info.log.latest_offset, 9);

    t.flush_buffered().unwrap();
    assert_eq!(t.info().unwrap().log.latest_offset, 12);

    // embedded offsets decode through the compressed sets
    for i in 0..13 {
        let p = t.payload(i).unwrap();
        assert_eq!(&p[..], format!("batched payload {i}").as_bytes());
    }

    // scanning yields each logical message separately
    let sc = t.new_scanner(0, false).await.unwrap();
    let cancel = CancellationToken::new();
    for i in 0..13 {
        let (m, o) = sc.scan(&cancel).await.unwrap();
        assert_eq!(o, i);
        assert_eq!(m.payload(), format!("batched payload {i}").as_bytes());
    }
}

#[tokio::test]
async fn close_and_reopen_preserves_everything() {
    let dir = tempdir().unwrap();
    {
        let store = open_store(dir.path()).await;
        let t = store
            .create_topic("durable", TopicSettings::default())
            .await
            .unwrap();
        for i in 0..6 {
            write_payload(&t, format!("kept {i}").as_bytes());
        }

        // a persistent scanner that consumed three messages
        let sc = t.new_scanner(0, true).await.unwrap();
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            sc.scan(&cancel).await.unwrap();
        }
        // give the offset drain task a beat before shutdown
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.close().await;
    }

    let store = open_store(dir.path()).await;
    assert_eq!(store.topic_list(), vec!["durable".to_string()]);

    let t = store.topic("durable").unwrap();
    let info = t.info().unwrap();
    assert_eq!(info.log.first_offset, 0);
    assert_eq!(info.log.latest_offset, 5);

    for i in 0..6 {
        assert_eq!(&t.payload(i).unwrap()[..], format!("kept {i}").as_bytes());
    }

    // the persistent scanner came back at one past its last offset
    assert_eq!(info.scanners.len(), 1);
    let restored = info.scanners.values().next().unwrap();
    assert!(restored.persist);
    assert_eq!(restored.from, 3);
    assert_eq!(restored.next, 3);
}

#[tokio::test]
async fn monitor_splits_oversized_segments() {
    let dir = tempdir().unwrap();
    let mut config = store_config(dir.path());
    config.general.monitor_interval = Some("50ms".to_string());

    let store = MessageStore::open(config).await.unwrap();
    let settings = TopicSettings {
        segment_size: 256,
        ..Default::default()
    };
    let t = store.create_topic("rolling", settings).await.unwrap();

    write_payload(&t, &[7u8; 512]);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let info = t.info().unwrap();
    assert!(info.log.segments.len() >= 2, "hot segment was not rolled");

    // data is still fully readable across the roll
    assert_eq!(t.payload(0).unwrap().len(), 512);
}

#[tokio::test]
async fn aged_segments_are_trimmed() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;

    let settings = TopicSettings {
        segment_age: Some("1ms".to_string()),
        segment_size: 16,
        ..Default::default()
    };
    let t = store.create_topic("aging", settings).await.unwrap();

    write_payload(&t, b"old enough to age out soon");

    // a single segment is never trimmed, however old
    tokio::time::sleep(Duration::from_millis(50)).await;
    t.check_segments().unwrap(); // age: skipped, size: splits
    assert_eq!(t.info().unwrap().log.segments.len(), 2);
    assert_eq!(t.info().unwrap().log.first_offset, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    t.check_segments().unwrap(); // trims the aged-out original
    let info = t.info().unwrap();
    assert_eq!(info.log.segments.len(), 1);
    assert_eq!(info.log.first_offset, 1);

    // new writes continue in the surviving offset space
    write_payload(&t, b"fresh");
    assert_eq!(t.info().unwrap().log.latest_offset, 1);
}

#[tokio::test]
async fn stream_ingest_drops_corrupt_messages() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let t = store
        .create_topic("ingest", TopicSettings::default())
        .await
        .unwrap();

    let good1 = Message::from_payload(b"good one");
    let good2 = Message::from_payload(b"good two");
    let mut corrupt = good1.bytes().to_vec();
    corrupt[9] ^= 0xff; // flip a payload byte, crc now mismatches

    let mut stream = Vec::new();
    stream.extend_from_slice(good1.bytes());
    stream.extend_from_slice(&corrupt);
    stream.extend_from_slice(good2.bytes());

    t.read_from(&mut &stream[..]).unwrap();

    // only the two intact messages landed
    assert_eq!(t.info().unwrap().log.latest_offset, 1);
    assert_eq!(&t.payload(0).unwrap()[..], b"good one");
    assert_eq!(&t.payload(1).unwrap()[..], b"good two");

    // a stream cut off mid-frame is a malformed request
    let truncated = &good1.bytes()[..good1.size() - 3];
    assert!(matches!(
        t.read_from(&mut &truncated[..]),
        Err(AppError::BadRequest(_))
    ));
    assert_eq!(t.info().unwrap().log.latest_offset, 1);
}

#[tokio::test]
async fn topic_lifecycle_and_busy_deletion() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;

    assert!(store.topic_list().is_empty());
    let t = store
        .create_topic("short-lived", TopicSettings::default())
        .await
        .unwrap();
    assert!(matches!(
        store.create_topic("short-lived", TopicSettings::default()).await,
        Err(AppError::TopicExists(_))
    ));
    assert!(matches!(
        store.topic("missing"),
        Err(AppError::TopicNotFound(_))
    ));

    write_payload(&t, b"data");

    // a live scanner keeps the topic busy
    let sc = t.new_scanner(0, false).await.unwrap();
    assert!(matches!(
        store.delete_topic("short-lived", false).await,
        Err(AppError::Busy)
    ));

    t.delete_scanner(sc.id()).unwrap();
    assert!(matches!(
        t.scanner(sc.id()),
        Err(AppError::ScannerNotFound(_))
    ));
    drop(sc);

    store.delete_topic("short-lived", false).await.unwrap();
    assert!(store.topic_list().is_empty());
    assert!(!dir.path().join("short-lived").exists());
}

#[tokio::test]
async fn deleting_scanners_stops_persistence() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let t = store
        .create_topic("cursors", TopicSettings::default())
        .await
        .unwrap();
    write_payload(&t, b"x");

    let sc = t.new_scanner(0, true).await.unwrap();
    let path = t
        .dir_path()
        .join("readers")
        .join(format!("{}.scanner", sc.id()));
    assert!(path.exists());

    t.delete_scanner(sc.id()).unwrap();
    assert!(!path.exists());
}
