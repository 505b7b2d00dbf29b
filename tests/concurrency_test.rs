//! Tests for serialization across threads
//! Run with: cargo test --test concurrency_test

use serde_json::json;
use sqlite_gate::{Config, Database, Error, TransactionMode};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

fn shared_db(config: Config) -> Arc<Database> {
    let db = Database::open_in_memory(config.allow_cross_thread_sharing(true)).unwrap();
    db.execute("CREATE TABLE a(id INTEGER)", &[]).unwrap();
    Arc::new(db)
}

fn all_ids(db: &Database) -> Vec<i64> {
    db.execute("SELECT id FROM a", &[]).unwrap();
    db.fetch_all()
        .unwrap()
        .into_iter()
        .map(|row| row[0].as_i64().unwrap())
        .collect()
}

mod operation_gate_tests {
    use super::*;

    #[test]
    fn test_at_most_one_operation_in_flight() {
        let db = shared_db(Config::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        db.with_connection(|conn| {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            conn.execute("INSERT INTO a VALUES (1)", [])?;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(all_ids(&db).len(), 400);
    }

    #[test]
    fn test_concurrent_transactions_never_fail_busy() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("busy.db"), Config::shared()).unwrap();
        db.execute("CREATE TABLE a(id INTEGER)", &[]).unwrap();
        let db = Arc::new(db);

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for sql in [
                        "BEGIN TRANSACTION",
                        "INSERT INTO a VALUES (1)",
                        "INSERT INTO a VALUES (2)",
                        "INSERT INTO a VALUES (3)",
                        "COMMIT",
                    ] {
                        db.execute(sql, &[]).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(all_ids(&db), [1i64, 2, 3].repeat(25));
    }

    #[test]
    fn test_hold_blocks_other_threads() {
        let db = shared_db(Config::new());
        let done = Arc::new(AtomicBool::new(false));

        let guard = db.hold().unwrap();
        let worker = {
            let db = Arc::clone(&db);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                db.execute("INSERT INTO a VALUES (9)", &[]).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst));
        guard.execute("INSERT INTO a VALUES (1)", &[]).unwrap();
        drop(guard);

        worker.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(all_ids(&db), vec![1i64, 9]);
    }
}

mod transaction_gate_tests {
    use super::*;

    #[test]
    fn test_serialized_transaction_blocks_other_writers() {
        let db = shared_db(Config::new());
        let committing = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel();

        let owner = {
            let db = Arc::clone(&db);
            let committing = Arc::clone(&committing);
            thread::spawn(move || {
                db.execute("BEGIN", &[]).unwrap();
                db.execute("INSERT INTO a VALUES (1)", &[]).unwrap();
                started_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(150));
                db.execute("INSERT INTO a VALUES (2)", &[]).unwrap();
                thread::sleep(Duration::from_millis(150));
                db.execute("INSERT INTO a VALUES (3)", &[]).unwrap();
                committing.store(true, Ordering::SeqCst);
                db.commit().unwrap();
            })
        };

        started_rx.recv().unwrap();
        let writers: Vec<_> = (0..9)
            .map(|i| {
                let db = Arc::clone(&db);
                let committing = Arc::clone(&committing);
                thread::spawn(move || {
                    db.execute("INSERT INTO a VALUES (?)", &[json!(100 + i)])
                        .unwrap();
                    // Only possible once the transaction let go of the gate.
                    assert!(committing.load(Ordering::SeqCst));
                })
            })
            .collect();

        owner.join().unwrap();
        for writer in writers {
            writer.join().unwrap();
        }

        let ids = all_ids(&db);
        assert_eq!(ids.len(), 12);
        assert_eq!(ids[..3], [1i64, 2, 3]);
        let mut others = ids[3..].to_vec();
        others.sort_unstable();
        assert_eq!(others, (100..109).collect::<Vec<i64>>());
    }

    #[test]
    fn test_unserialized_transaction_allows_interleaving() {
        let db = shared_db(Config::new().serialize_transactions(false));
        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let owner = {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                db.execute("BEGIN", &[]).unwrap();
                db.execute("INSERT INTO a VALUES (1)", &[]).unwrap();
                started_tx.send(()).unwrap();
                for _ in 0..9 {
                    done_rx.recv().unwrap();
                }
                db.execute("INSERT INTO a VALUES (2)", &[]).unwrap();
                db.execute("INSERT INTO a VALUES (3)", &[]).unwrap();
                db.commit().unwrap();
            })
        };

        started_rx.recv().unwrap();
        let writers: Vec<_> = (0..9)
            .map(|i| {
                let db = Arc::clone(&db);
                let done_tx = done_tx.clone();
                thread::spawn(move || {
                    db.execute("INSERT INTO a VALUES (?)", &[json!(100 + i)])
                        .unwrap();
                    done_tx.send(()).unwrap();
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        owner.join().unwrap();

        let ids = all_ids(&db);
        assert_eq!(ids.len(), 12);
        assert_eq!(ids[0], 1);
        assert_eq!(ids[10..], [2i64, 3]);
    }

    #[test]
    fn test_commit_from_non_owner_rejected() {
        let db = shared_db(Config::new().serialize_transactions(false));
        db.execute("BEGIN", &[]).unwrap();

        let other = Arc::clone(&db);
        let err = thread::spawn(move || other.commit().unwrap_err())
            .join()
            .unwrap();
        assert!(matches!(err, Error::NotTransactionOwner { .. }));
        assert!(err.is_misuse());

        assert!(db.in_transaction().unwrap());
        db.rollback().unwrap();
    }

    #[test]
    fn test_panicking_transaction_body_releases_gate() {
        let db = shared_db(Config::new());

        let panicked = {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                db.transaction(TransactionMode::Deferred, |db| -> sqlite_gate::Result<()> {
                    db.execute("INSERT INTO a VALUES (1)", &[])?;
                    panic!("transaction body failed")
                })
            })
            .join()
        };
        assert!(panicked.is_err());
        assert!(!db.is_locked());

        let other = Arc::clone(&db);
        thread::spawn(move || other.execute("INSERT INTO a VALUES (2)", &[]).unwrap())
            .join()
            .unwrap();
        assert_eq!(all_ids(&db), vec![2i64]);
    }

    #[test]
    fn test_owner_never_blocks_itself() {
        let db = shared_db(Config::new());
        db.execute("BEGIN", &[]).unwrap();
        {
            let _guard = db.hold().unwrap();
            for i in 0..20 {
                db.execute("INSERT INTO a VALUES (?)", &[json!(i)]).unwrap();
            }
            db.execute("SELECT COUNT(*) FROM a", &[]).unwrap();
            assert_eq!(db.fetch_one().unwrap(), Some(vec![json!(20)]));
        }
        db.commit().unwrap();
        assert!(!db.is_locked());
    }
}

mod close_tests {
    use super::*;

    #[test]
    fn test_close_reclaims_idle_transaction_of_other_thread() {
        let db = shared_db(Config::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (closed_tx, closed_rx) = mpsc::channel::<()>();

        let owner = {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                db.execute("BEGIN", &[]).unwrap();
                db.execute("INSERT INTO a VALUES (1)", &[]).unwrap();
                started_tx.send(thread::current().id()).unwrap();
                closed_rx.recv().unwrap();
                db.commit()
            })
        };

        let owner_id = started_rx.recv().unwrap();
        match db.close() {
            Err(Error::AbandonedTransaction { owner }) => assert_eq!(owner, owner_id),
            other => panic!("unexpected close result: {other:?}"),
        }
        assert!(!db.is_locked());

        closed_tx.send(()).unwrap();
        assert!(matches!(owner.join().unwrap(), Err(Error::Closed)));
        assert!(!db.is_locked());
    }

    #[test]
    fn test_close_reclaims_transaction_of_finished_thread() {
        let db = shared_db(Config::new());
        {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                db.execute("BEGIN", &[]).unwrap();
                db.execute("INSERT INTO a VALUES (1)", &[]).unwrap();
            })
            .join()
            .unwrap();
        }

        assert!(db.is_locked());
        assert!(matches!(
            db.close(),
            Err(Error::AbandonedTransaction { .. })
        ));
        assert!(!db.is_locked());
    }

    #[test]
    fn test_close_waits_for_in_flight_hold() {
        let db = shared_db(Config::new());
        let released = Arc::new(AtomicBool::new(false));
        let (held_tx, held_rx) = mpsc::channel();

        let holder = {
            let db = Arc::clone(&db);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let guard = db.hold().unwrap();
                held_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
                released.store(true, Ordering::SeqCst);
                drop(guard);
            })
        };

        held_rx.recv().unwrap();
        db.close().unwrap();
        assert!(released.load(Ordering::SeqCst));
        holder.join().unwrap();
    }

    #[test]
    fn test_close_under_load() {
        let db = shared_db(Config::new());
        let barrier = Arc::new(Barrier::new(26));

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let db = Arc::clone(&db);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        match db.execute("SELECT 1", &[]) {
                            Ok(_) | Err(Error::Closed) => {}
                            Err(other) => return Err(other),
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        barrier.wait();
        db.close().unwrap();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert!(db.is_closed());
        assert!(!db.is_locked());
    }
}
