//! Integration tests for the full ledger pipeline.
//!
//! Tests: Service → Transaction → LedgerStore (journal, bus) → Projection
//!
//! Verifies:
//! - The acceptance scenarios for capacity, FEFO, pallets, pick lists and batches
//! - Idempotent commands, pallet conservation, no oversell under concurrency
//! - Journal replay, quarantine isolation and projection rebuilds

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use chrono::NaiveDate;

    use cellarledger_core::UserId;
    use cellarledger_events::{EventBus, ProjectionRunner};
    use cellarledger_warehouse::{
        AllocationHolder, AllocationOutcome, AllocationPolicy, AllocationRequest, BatchStatus, CommandContext,
        IdempotencyKey, LedgerError, Location, LocationCode, LocationType, LotNumber, MovementInput, MovementType,
        OrderId, OwnerId, PalletCode, PalletOwnership, PickListStatus, PickRequestLine, ProductRef, RowRef,
        StockLineKey, StockRef,
    };

    use crate::config::LedgerConfig;
    use crate::journal::{FileJournal, InMemoryJournal, Journal};
    use crate::projections::{ProjectionWorker, StockSummaryProjection};
    use crate::service::WarehouseService;
    use crate::store::{ChangeBus, LedgerStore};

    const WINE: &str = "101234520151200750";
    const SPIRIT: &str = "100200320101200700";

    fn ctx() -> CommandContext {
        CommandContext::new(UserId::new())
    }

    fn loc(code: &str) -> LocationCode {
        LocationCode::new(code).unwrap()
    }

    fn product(code: &str) -> ProductRef {
        ProductRef::new(code).unwrap()
    }

    fn owner(code: &str) -> OwnerId {
        OwnerId::new(code).unwrap()
    }

    fn stock(product_code: &str, owner_code: &str, lot: &str) -> StockRef {
        StockRef::new(product(product_code), owner(owner_code), LotNumber::new(lot).unwrap())
    }

    fn with_locations<J: Journal>(service: WarehouseService<J>) -> WarehouseService<J> {
        let c = ctx();
        for location in [
            Location::new(loc("DOCK"), LocationType::Receiving),
            Location::new(loc("RAK-01"), LocationType::Rack).with_capacity(100),
            Location::new(loc("RAK-02"), LocationType::Rack),
            Location::new(loc("FLR-01"), LocationType::Floor).with_forklift(),
            Location::new(loc("SHIP"), LocationType::Shipping),
        ] {
            service.register_location(&c, location).unwrap();
        }
        service
    }

    fn setup_with(config: LedgerConfig) -> WarehouseService<InMemoryJournal> {
        let store = LedgerStore::open(config, InMemoryJournal::new(), ChangeBus::new()).unwrap();
        with_locations(WarehouseService::new(store))
    }

    fn setup() -> WarehouseService<InMemoryJournal> {
        setup_with(LedgerConfig::default())
    }

    fn receive<J: Journal>(
        service: &WarehouseService<J>,
        stock: &StockRef,
        at: &str,
        cases: u32,
        expiry: Option<NaiveDate>,
    ) -> StockLineKey {
        service
            .record(
                &ctx(),
                MovementInput::Receive {
                    stock: stock.clone(),
                    location: loc(at),
                    quantity_cases: cases,
                    expiry_date: expiry,
                    is_perishable: expiry.is_some(),
                },
            )
            .unwrap();
        stock.at(loc(at))
    }

    fn quantities<J: Journal>(service: &WarehouseService<J>, key: &StockLineKey) -> (u32, u32) {
        service
            .stock_line(key)
            .unwrap()
            .map_or((0, 0), |l| (l.quantity_cases, l.reserved_cases))
    }

    fn request(product_code: &str, owner_code: &str, cases: u32, policy: AllocationPolicy) -> AllocationRequest {
        AllocationRequest {
            product: product(product_code),
            owner: Some(owner(owner_code)),
            quantity_cases: cases,
            policy,
            holder: AllocationHolder::Order(OrderId::new("SO-1001").unwrap()),
        }
    }

    #[test]
    fn capacity_rejects_the_putaway_that_would_overflow() {
        let service = setup();
        let dock = receive(&service, &stock(WINE, "A", "L1"), "DOCK", 110, None);

        let putaway = |cases| MovementInput::Putaway {
            line: dock.clone(),
            to: loc("RAK-01"),
            quantity_cases: cases,
        };
        service.record(&ctx(), putaway(60)).unwrap();
        let err = service.record(&ctx(), putaway(50)).unwrap_err();

        assert!(matches!(
            err,
            LedgerError::CapacityExceeded {
                capacity_cases: 100,
                stored_cases: 60,
                incoming_cases: 50,
                ..
            }
        ));
        let rack = stock(WINE, "A", "L1").at(loc("RAK-01"));
        assert_eq!(quantities(&service, &rack), (60, 0));
        assert_eq!(quantities(&service, &dock), (50, 0));
    }

    #[test]
    fn fefo_draws_the_earliest_expiry_first() {
        let service = setup();
        let l1 = receive(
            &service,
            &stock(WINE, "A", "L1"),
            "RAK-02",
            10,
            NaiveDate::from_ymd_opt(2025, 1, 1),
        );
        let l2 = receive(
            &service,
            &stock(WINE, "A", "L2"),
            "RAK-02",
            10,
            NaiveDate::from_ymd_opt(2026, 1, 1),
        );

        let outcome = service
            .allocate(&ctx(), request(WINE, "A", 15, AllocationPolicy::Fefo))
            .unwrap()
            .into_value()
            .unwrap();

        let lines = match outcome {
            AllocationOutcome::Allocated { lines, .. } => lines,
            other => panic!("expected a full allocation, got {other:?}"),
        };
        let drawn: Vec<_> = lines.iter().map(|l| (l.line.clone(), l.quantity_cases)).collect();
        assert_eq!(drawn, vec![(l1.clone(), 10), (l2.clone(), 5)]);
        assert_eq!(quantities(&service, &l1), (10, 10));
        assert_eq!(quantities(&service, &l2), (10, 5));
    }

    #[test]
    fn sealed_pallet_rejects_cases_until_unsealed() {
        let service = setup();
        let c = ctx();
        let loose = receive(&service, &stock(WINE, "A", "L1"), "RAK-02", 30, None);
        let pallet = PalletCode::new("P-0001").unwrap();

        service
            .create_pallet(&c, &pallet, PalletOwnership::Single(owner("A")), &loc("RAK-02"))
            .unwrap();
        service.add_to_pallet(&c, &pallet, &loose, 20).unwrap();
        service.seal_pallet(&c, &pallet).unwrap();

        let err = service.add_to_pallet(&c, &pallet, &loose, 5).unwrap_err();
        assert_eq!(err, LedgerError::PalletSealed { pallet: pallet.clone() });

        service.unseal_pallet(&c, &pallet).unwrap();
        let added = service.add_to_pallet(&c, &pallet, &loose, 5).unwrap();
        assert_eq!(added.into_value().unwrap().total_cases(), 25);
        assert_eq!(quantities(&service, &loose), (5, 0));
    }

    #[test]
    fn cancelling_a_half_picked_list_restores_availability() {
        let service = setup();
        let c = ctx();
        let a = receive(&service, &stock(WINE, "A", "L1"), "RAK-02", 10, None);
        let b = receive(&service, &stock(SPIRIT, "B", "L7"), "RAK-02", 10, None);

        let id = service
            .create_pick_list(
                &c,
                &OrderId::new("SO-4").unwrap(),
                vec![
                    PickRequestLine {
                        product: product(WINE),
                        owner: Some(owner("A")),
                        quantity_cases: 4,
                        policy: AllocationPolicy::Auto,
                    },
                    PickRequestLine {
                        product: product(SPIRIT),
                        owner: Some(owner("B")),
                        quantity_cases: 3,
                        policy: AllocationPolicy::Auto,
                    },
                ],
            )
            .unwrap()
            .into_value()
            .unwrap();
        service.start_pick_list(&c, &id, UserId::new()).unwrap();
        service.pick_line(&c, &id, 0, 4).unwrap();

        let list = service.pick_list(&id).unwrap();
        assert_eq!(list.status(), PickListStatus::InProgress);
        assert_eq!((list.picked_items(), list.total_items()), (1, 2));
        assert_eq!(quantities(&service, &b), (10, 3));

        service.cancel_pick_list(&c, &id).unwrap();
        assert_eq!(service.pick_list(&id).unwrap().status(), PickListStatus::Cancelled);
        assert_eq!(quantities(&service, &a), (6, 0));
        assert_eq!(quantities(&service, &b), (10, 0));
        let available: u32 = service
            .get_available(&product(SPIRIT), Some(&owner("B")))
            .unwrap()
            .iter()
            .map(|s| s.available_cases)
            .sum();
        assert_eq!(available, 10);
    }

    #[test]
    fn batch_cannot_stage_while_a_pick_list_is_in_progress() {
        let service = setup();
        let c = ctx();
        receive(&service, &stock(WINE, "A", "L1"), "RAK-02", 10, None);
        let id = service
            .create_pick_list(
                &c,
                &OrderId::new("SO-5").unwrap(),
                vec![PickRequestLine {
                    product: product(WINE),
                    owner: None,
                    quantity_cases: 6,
                    policy: AllocationPolicy::Fifo,
                }],
            )
            .unwrap()
            .into_value()
            .unwrap();
        service.start_pick_list(&c, &id, UserId::new()).unwrap();
        service.pick_line(&c, &id, 0, 2).unwrap();

        let batch = service.create_batch(&c, "Bonded warehouse").unwrap().into_value().unwrap();
        service.add_pick_list_to_batch(&c, &batch, &id).unwrap();
        service.start_batch_picking(&c, &batch).unwrap();

        let err = service.stage_batch(&c, &batch).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(service.batch(&batch).unwrap().status(), BatchStatus::Picking);

        service.pick_line(&c, &id, 0, 4).unwrap();
        let staged = service.stage_batch(&c, &batch).unwrap().into_value().unwrap();
        assert_eq!(staged.status(), BatchStatus::Staged);
        service.dispatch_batch(&c, &batch).unwrap();
        service.deliver_batch(&c, &batch).unwrap();
        assert_eq!(service.batch(&batch).unwrap().status(), BatchStatus::Delivered);
    }

    #[test]
    fn same_idempotency_key_records_once() {
        let service = setup();
        let key = IdempotencyKey::new("carrier-receipt-889").unwrap();
        let c = ctx().with_idempotency_key(key);
        let input = MovementInput::Receive {
            stock: stock(WINE, "A", "L1"),
            location: loc("DOCK"),
            quantity_cases: 12,
            expiry_date: None,
            is_perishable: false,
        };

        let first = service.record(&c, input.clone()).unwrap();
        let second = service.record(&c, input).unwrap();

        assert!(second.is_replayed());
        assert_eq!(first.movements(), second.movements());
        assert_eq!(first.movements().len(), 1);
        assert_eq!(quantities(&service, &stock(WINE, "A", "L1").at(loc("DOCK"))), (12, 0));
        assert_eq!(service.store().read(|s| s.movement_count()).unwrap(), 1);
    }

    #[test]
    fn repeated_pick_with_one_key_picks_once() {
        let service = setup();
        let c = ctx();
        let line = receive(&service, &stock(WINE, "A", "L1"), "RAK-02", 10, None);
        let id = service
            .create_pick_list(
                &c,
                &OrderId::new("SO-77").unwrap(),
                vec![PickRequestLine {
                    product: product(WINE),
                    owner: Some(owner("A")),
                    quantity_cases: 6,
                    policy: AllocationPolicy::Fifo,
                }],
            )
            .unwrap()
            .into_value()
            .unwrap();
        service.start_pick_list(&c, &id, UserId::new()).unwrap();

        let keyed = ctx().with_idempotency_key(IdempotencyKey::new("scan-SO-77-0001").unwrap());
        let first = service.pick_line(&keyed, &id, 0, 2).unwrap();
        let count = service.store().read(|s| s.movement_count()).unwrap();
        let second = service.pick_line(&keyed, &id, 0, 2).unwrap();

        assert!(!first.is_replayed());
        assert!(second.is_replayed());
        assert_eq!(first.movements(), second.movements());
        assert_eq!(first.movements().len(), 1);
        assert_eq!(first.movements()[0].movement_type, MovementType::Pick);
        assert_eq!(service.store().read(|s| s.movement_count()).unwrap(), count);
        assert_eq!(quantities(&service, &line), (8, 4));
        let list = service.pick_list(&id).unwrap();
        assert_eq!(list.line(0).unwrap().picked_cases, 2);
        assert_eq!(list.status(), PickListStatus::InProgress);
    }

    #[test]
    fn repeated_pallet_dispatch_with_one_key_ships_once() {
        let service = setup();
        let c = ctx();
        let loose = receive(&service, &stock(WINE, "A", "L1"), "FLR-01", 8, None);
        let pallet = PalletCode::new("P-0009").unwrap();
        service
            .create_pallet(&c, &pallet, PalletOwnership::Single(owner("A")), &loc("FLR-01"))
            .unwrap();
        service.add_to_pallet(&c, &pallet, &loose, 5).unwrap();
        service.seal_pallet(&c, &pallet).unwrap();

        let keyed = ctx().with_idempotency_key(IdempotencyKey::new("truck-0412-P-0009").unwrap());
        let first = service.dispatch_pallet(&keyed, &pallet).unwrap();
        let count = service.store().read(|s| s.movement_count()).unwrap();
        let second = service.dispatch_pallet(&keyed, &pallet).unwrap();

        assert!(!first.is_replayed());
        assert!(second.is_replayed());
        assert_eq!(first.movements(), second.movements());
        assert_eq!(first.movements().len(), 1);
        assert_eq!(first.movements()[0].movement_type, MovementType::PalletDispatch);
        assert_eq!(service.store().read(|s| s.movement_count()).unwrap(), count);
        assert_eq!(quantities(&service, &loose), (3, 0));
        assert_eq!(service.store().read(|s| s.location_load(&loc("FLR-01"))).unwrap(), 3);
    }

    #[test]
    fn pallet_add_then_remove_restores_line_and_pallet() {
        let service = setup();
        let c = ctx();
        let s = stock(WINE, "A", "L1");
        let loose = receive(&service, &s, "RAK-02", 12, None);
        let pallet = PalletCode::new("P-0002").unwrap();
        service
            .create_pallet(&c, &pallet, PalletOwnership::Mixed, &loc("RAK-02"))
            .unwrap();

        let line_before = service.stock_line(&loose).unwrap();
        let pallet_before = service.pallet(&pallet).unwrap();

        service.add_to_pallet(&c, &pallet, &loose, 7).unwrap();
        service.remove_from_pallet(&c, &pallet, &s, 7).unwrap();

        let pallet_after = service.pallet(&pallet).unwrap();
        assert_eq!(service.stock_line(&loose).unwrap(), line_before);
        assert_eq!(pallet_after.members(), pallet_before.members());
        assert_eq!(pallet_after.status(), pallet_before.status());
        assert_eq!(service.store().read(|st| st.location_load(&loc("RAK-02"))).unwrap(), 12);
    }

    #[test]
    fn concurrent_allocations_never_oversell() {
        let service = setup_with(LedgerConfig {
            max_commit_attempts: 64,
            ..LedgerConfig::default()
        });
        receive(&service, &stock(WINE, "A", "L1"), "RAK-02", 20, None);
        receive(&service, &stock(WINE, "A", "L2"), "FLR-01", 15, None);

        let outcomes: Vec<AllocationOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        service
                            .allocate(&ctx(), request(WINE, "A", 10, AllocationPolicy::Fifo))
                            .unwrap()
                            .into_value()
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let allocated: u32 = outcomes.iter().map(AllocationOutcome::allocated_cases).sum();
        let short: u32 = outcomes
            .iter()
            .filter_map(AllocationOutcome::shortfall)
            .map(|s| s.missing_cases())
            .sum();
        assert_eq!(allocated, 35);
        assert_eq!(allocated + short, 80);

        service
            .store()
            .read(|s| {
                for line in s.lines() {
                    assert!(line.reserved_cases <= line.quantity_cases);
                }
                for key in s.touched_lines() {
                    assert!(s.check_line(key).is_consistent());
                }
            })
            .unwrap();
    }

    #[test]
    fn racing_receipts_name_the_line_they_fought_over() {
        let service = setup_with(LedgerConfig {
            max_commit_attempts: 1,
            ..LedgerConfig::default()
        });
        let line = receive(&service, &stock(WINE, "A", "L1"), "RAK-02", 1, None);

        let results: Vec<Result<(), LedgerError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..25)
                            .map(|_| {
                                service
                                    .record(
                                        &ctx(),
                                        MovementInput::Receive {
                                            stock: stock(WINE, "A", "L1"),
                                            location: loc("RAK-02"),
                                            quantity_cases: 1,
                                            expiry_date: None,
                                            is_perishable: false,
                                        },
                                    )
                                    .map(|_| ())
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let committed = results.iter().filter(|r| r.is_ok()).count() as u32;
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            match err {
                LedgerError::Contention { attempts, contended, .. } => {
                    assert_eq!(*attempts, 1);
                    assert_eq!(contended, &Some(RowRef::Line(line.clone())));
                }
                other => panic!("expected contention, got {other:?}"),
            }
        }
        assert_eq!(quantities(&service, &line), (1 + committed, 0));
    }

    #[test]
    fn write_lock_starvation_surfaces_as_contention() {
        let service = setup_with(LedgerConfig {
            lock_timeout: Duration::from_millis(5),
            max_commit_attempts: 3,
            backoff_base: Duration::from_millis(1),
            journal_path: None,
        });
        let (held_tx, held_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let shared = &service;
        std::thread::scope(|scope| {
            scope.spawn(move || {
                shared
                    .store()
                    .read(|_| {
                        let _ = held_tx.send(());
                        let _ = release_rx.recv_timeout(Duration::from_secs(5));
                    })
                    .unwrap();
            });
            held_rx.recv().unwrap();

            let err = service
                .register_location(&ctx(), Location::new(loc("RAK-03"), LocationType::Rack))
                .unwrap_err();
            let _ = release_tx.send(());

            match &err {
                LedgerError::Contention {
                    attempts, contended, ..
                } => {
                    assert_eq!(*attempts, 3);
                    assert_eq!(contended, &Some(RowRef::Location(loc("RAK-03"))));
                }
                other => panic!("expected contention, got {other:?}"),
            }
            assert!(err.to_string().contains("location RAK-03"));
            assert!(err.is_retryable());
        });

        service
            .register_location(&ctx(), Location::new(loc("RAK-03"), LocationType::Rack))
            .unwrap();
    }

    #[test]
    fn file_journal_replay_reproduces_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellar.jsonl");
        let config = LedgerConfig::default().with_journal_path(&path);

        let before = {
            let store = LedgerStore::open(config.clone(), FileJournal::open(&path).unwrap(), ChangeBus::new()).unwrap();
            let service = with_locations(WarehouseService::new(store));
            let c = ctx();
            let l1 = receive(&service, &stock(WINE, "A", "L1"), "DOCK", 40, NaiveDate::from_ymd_opt(2027, 3, 1));
            service
                .record(
                    &c,
                    MovementInput::Putaway {
                        line: l1.clone(),
                        to: loc("RAK-01"),
                        quantity_cases: 30,
                    },
                )
                .unwrap();
            service
                .record(
                    &ctx().with_notes("breakage found on inspection"),
                    MovementInput::Adjust {
                        line: l1,
                        delta_cases: -2,
                    },
                )
                .unwrap();
            service
                .allocate(&c, request(WINE, "A", 12, AllocationPolicy::Auto))
                .unwrap();
            service.store().snapshot().unwrap()
        };

        let reopened = LedgerStore::open_configured(config).unwrap();
        assert_eq!(reopened.snapshot().unwrap(), before);
        assert_eq!(reopened.commit_sequence().unwrap(), 9);

        let service = WarehouseService::new(reopened);
        let next = service
            .record(
                &ctx(),
                MovementInput::Receive {
                    stock: stock(SPIRIT, "B", "L1"),
                    location: loc("DOCK"),
                    quantity_cases: 1,
                    expiry_date: None,
                    is_perishable: false,
                },
            )
            .unwrap();
        let last_before = before.movements.last().unwrap().movement_number.value();
        assert_eq!(next.movements()[0].movement_number.value(), last_before + 1);
    }

    #[test]
    fn quarantine_blocks_only_the_inconsistent_line() {
        let seeded = setup();
        let bad = receive(&seeded, &stock(WINE, "A", "L1"), "RAK-02", 10, None);
        let good = receive(&seeded, &stock(WINE, "A", "L2"), "RAK-02", 10, None);

        let mut snapshot = seeded.store().snapshot().unwrap();
        for line in snapshot.lines.iter_mut().filter(|l| l.key == bad) {
            line.quantity_cases = 13;
        }
        let service = WarehouseService::new(LedgerStore::from_snapshot(
            LedgerConfig::default(),
            snapshot,
            ChangeBus::new(),
        ));

        let commits = service.store().commit_sequence().unwrap();
        let dry = service.check_all().unwrap();
        assert_eq!(dry.inconsistent.len(), 1);
        assert!(service.quarantined().unwrap().is_empty());
        assert_eq!(service.store().commit_sequence().unwrap(), commits);

        let report = service.verify_all(&ctx()).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.inconsistent.len(), 1);
        assert_eq!(report.inconsistent[0].replayed, Some((10, 0)));
        assert_eq!(service.quarantined().unwrap(), vec![bad.clone()]);

        let err = service
            .record(
                &ctx(),
                MovementInput::Transfer {
                    line: bad.clone(),
                    to: loc("FLR-01"),
                    quantity_cases: 1,
                },
            )
            .unwrap_err();
        assert_eq!(err, LedgerError::LedgerInconsistent { line: bad.clone() });

        let outcome = service
            .allocate(&ctx(), request(WINE, "A", 15, AllocationPolicy::Fifo))
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!(outcome.allocated_cases(), 10);
        assert!(outcome.lines().iter().all(|l| l.line == good));

        service.reconcile_line(&ctx(), &bad).unwrap();
        assert!(service.quarantined().unwrap().is_empty());
        assert_eq!(quantities(&service, &bad), (10, 0));
        assert!(service.verify_all(&ctx()).unwrap().is_consistent());
    }

    #[test]
    fn projection_attached_to_a_reopened_store_keeps_following() {
        let first = setup();
        receive(&first, &stock(WINE, "A", "L1"), "RAK-02", 5, None);
        let journal = InMemoryJournal::new();
        for entry in first.store().journal().load_all().unwrap() {
            journal.append(&entry).unwrap();
        }

        let store = LedgerStore::open(LedgerConfig::default(), journal, ChangeBus::new()).unwrap();
        let history = store.envelopes().unwrap().len() as u64;
        let runner = Arc::new(Mutex::new(ProjectionRunner::new(StockSummaryProjection::new())));
        let worker = ProjectionWorker::attach("stock-summary", &store, runner.clone()).unwrap();
        assert_eq!(
            runner.lock().unwrap().cursor().map(|c| c.last_sequence_number()),
            Some(history)
        );

        let service = WarehouseService::new(store);
        receive(&service, &stock(WINE, "A", "L1"), "RAK-02", 7, None);

        let last = service.store().envelopes().unwrap().len() as u64;
        assert!(last > history);
        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.lock().unwrap().cursor().map(|c| c.last_sequence_number()) != Some(last) {
            assert!(Instant::now() < deadline, "projection stopped following the bus");
            std::thread::sleep(Duration::from_millis(5));
        }
        worker.shutdown();

        let ledger_total = service.store().read(|s| s.total_cases(&product(WINE))).unwrap();
        assert_eq!(ledger_total, 12);
        assert_eq!(runner.lock().unwrap().projection().total_cases(&product(WINE)), ledger_total);
    }

    #[test]
    fn projection_follows_the_bus_and_rebuilds_identically() {
        let store = LedgerStore::open(LedgerConfig::default(), InMemoryJournal::new(), ChangeBus::new()).unwrap();
        let runner = Arc::new(Mutex::new(ProjectionRunner::new(StockSummaryProjection::new())));
        let worker = ProjectionWorker::spawn("stock-summary", store.bus().subscribe(), runner.clone()).unwrap();
        assert_eq!(store.bus().subscriber_count(), 1);
        let service = with_locations(WarehouseService::new(store));

        let c = ctx();
        let wine = receive(&service, &stock(WINE, "A", "L1"), "DOCK", 24, None);
        receive(&service, &stock(SPIRIT, "B", "L1"), "RAK-02", 6, None);
        service
            .record(
                &c,
                MovementInput::Putaway {
                    line: wine,
                    to: loc("RAK-01"),
                    quantity_cases: 20,
                },
            )
            .unwrap();
        let pallet = PalletCode::new("P-0003").unwrap();
        service
            .create_pallet(&c, &pallet, PalletOwnership::Mixed, &loc("RAK-01"))
            .unwrap();
        service
            .add_to_pallet(&c, &pallet, &stock(WINE, "A", "L1").at(loc("RAK-01")), 8)
            .unwrap();
        service
            .allocate(&c, request(SPIRIT, "B", 2, AllocationPolicy::Fifo))
            .unwrap();

        let envelopes = service.store().envelopes().unwrap();
        let last = envelopes.last().map(|e| e.sequence_number()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.lock().unwrap().cursor().map(|c| c.last_sequence_number()) != Some(last) {
            assert!(Instant::now() < deadline, "projection did not catch up");
            std::thread::sleep(Duration::from_millis(5));
        }
        worker.shutdown();

        let live = Arc::try_unwrap(runner).unwrap().into_inner().unwrap().into_projection();
        let (rebuilt, _) = ProjectionRunner::rebuild_from_scratch(StockSummaryProjection::new, &envelopes).unwrap();

        assert_eq!(live.list(), rebuilt.list());
        for code in [WINE, SPIRIT] {
            let ledger_total = service.store().read(|s| s.total_cases(&product(code))).unwrap();
            assert_eq!(live.total_cases(&product(code)), ledger_total);
        }
        let wine_row = live.get(&product(WINE), &owner("A")).unwrap();
        assert_eq!((wine_row.quantity_cases, wine_row.palletised_cases), (24, 8));
        assert_eq!(live.movement_count(MovementType::Reserve), 1);
    }
}
