//! End-to-end wizard runs against the in-memory store and mock ingestion
//! client: the dual-dispatch happy path, atomicity under injected failures,
//! lease contention, and the resume paths.

use costeo::{
    allocate, create_dispatch, delete_dispatch, AllocationStore, CatalogStore, CompanyId,
    CostCategory, Dispatch, DispatchDraft, DispatchId, DispatchNumber, DispatchRegistry,
    DispatchStatus, InMemoryStore, IngestionReceipt, MockIngestionClient, Money, ProductId,
    ProductLine, RunId, Selection, SpreadsheetDocument, Wizard,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn dispatch(number: &str, status: DispatchStatus, fob_usd: Decimal) -> Dispatch {
    Dispatch {
        id: DispatchId(Uuid::new_v4()),
        number: DispatchNumber::from(number),
        origin: "CN".to_string(),
        description: Some(format!("Shipment {number}")),
        status,
        company_id: Some(CompanyId(Uuid::new_v4())),
        total_fob_usd: Money::new(fob_usd),
        total_fob_ars: None,
        created_at: chrono::Utc::now(),
    }
}

fn product(sku: &str, quantity: i64, unit_price_usd: Decimal, number: &str) -> ProductLine {
    ProductLine {
        id: ProductId(Uuid::new_v4()),
        sku: sku.to_string(),
        name: format!("Product {sku}"),
        quantity,
        unit_price_usd: Money::new(unit_price_usd),
        price: None,
        neto: None,
        dispatch_number: DispatchNumber::from(number),
    }
}

fn document(name: &str) -> SpreadsheetDocument {
    SpreadsheetDocument {
        filename: name.to_string(),
        content: b"xlsx".to_vec(),
    }
}

/// Seed the spec scenario: D1 FOB 1000 + D2 FOB 500 foreign, rate 1000,
/// costs 300000 local. Lines: A (fob 100), B (fob 900) on D1; C (fob 500)
/// on D2.
fn seed_scenario(store: &InMemoryStore) -> (Dispatch, Dispatch, ProductLine, ProductLine, ProductLine)
{
    let d1 = dispatch("D1", DispatchStatus::Open, dec!(1000));
    let d2 = dispatch("D2", DispatchStatus::Open, dec!(500));
    store.insert_dispatch(d1.clone());
    store.insert_dispatch(d2.clone());

    let a = product("A", 10, dec!(10), "D1");
    let b = product("B", 2, dec!(450), "D1");
    let c = product("C", 5, dec!(100), "D2");
    store.insert_product(a.clone());
    store.insert_product(b.clone());
    store.insert_product(c.clone());
    (d1, d2, a, b, c)
}

fn ingestion_for(d1: &Dispatch, d2: &Dispatch) -> MockIngestionClient {
    let ingestion = MockIngestionClient::new();
    ingestion.add_receipt(
        "D1",
        IngestionReceipt {
            dispatch_id: d1.id,
            total_fob_foreign: Money::new(dec!(1000)),
        },
    );
    ingestion.add_receipt(
        "D2",
        IngestionReceipt {
            dispatch_id: d2.id,
            total_fob_foreign: Money::new(dec!(500)),
        },
    );
    ingestion
}

#[tokio::test]
async fn dual_dispatch_run_commits_expected_prices() {
    let store = InMemoryStore::new();
    let (d1, d2, a, b, c) = seed_scenario(&store);
    let ingestion = ingestion_for(&d1, &d2);

    let confirmed = match Wizard::start().select_primary(d1.clone()) {
        Selection::Confirmed(w) => w,
        Selection::Resumed(_) => panic!("open dispatch must not resume"),
    };
    let uploading = confirmed
        .pair_secondary(d2.clone())
        .unwrap()
        .begin_upload();
    let mut costs = uploading
        .upload(&ingestion, document("d1.xlsx"), Some(document("d2.xlsx")))
        .await
        .unwrap();

    // Uploads are strictly sequential, primary first, both tagged pool size 2.
    let uploads = ingestion.uploads();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].dispatch_number, DispatchNumber::from("D1"));
    assert_eq!(uploads[1].dispatch_number, DispatchNumber::from("D2"));
    assert!(uploads.iter().all(|u| u.pool_size == 2));

    costs.set_exchange_rate(dec!(1000)).unwrap();
    costs
        .set_cost(CostCategory::Freight, Money::new(dec!(200000)))
        .unwrap();
    costs
        .set_cost(CostCategory::Duties, Money::new(dec!(100000)))
        .unwrap();

    let summary = costs.compute_margin().unwrap();
    assert_eq!(summary.total_fob_local, Money::new(dec!(1_500_000)));
    assert_eq!(summary.subtotal, Money::new(dec!(1_800_000)));
    assert_eq!(summary.margin, Money::new(dec!(414_000)));
    assert_eq!(summary.total_to_distribute, Money::new(dec!(2_214_000)));

    let committed = costs.commit(&store).await.unwrap();
    let recap = committed.summary();
    assert_eq!(recap.lines_updated, 3);
    assert_eq!(recap.pool_key, "D1+D2");

    // Landed prices: A gets 100/1500 of 2,214,000 = 147,600 at 14,760/unit.
    let a_after = store.product(a.id).unwrap();
    assert_eq!(a_after.price, Some(Money::new(dec!(14_760))));
    assert_eq!(a_after.neto, Some(Money::new(dec!(147_600))));
    let b_after = store.product(b.id).unwrap();
    assert_eq!(b_after.neto, Some(Money::new(dec!(1_328_400))));
    let c_after = store.product(c.id).unwrap();
    assert_eq!(c_after.neto, Some(Money::new(dec!(738_000))));

    // Both dispatches completed, with their own FOB totals converted.
    let d1_after = store.dispatch(d1.id).unwrap();
    assert_eq!(d1_after.status, DispatchStatus::Completed);
    assert_eq!(d1_after.total_fob_usd, Money::new(dec!(1000)));
    assert_eq!(d1_after.total_fob_ars, Some(Money::new(dec!(1_000_000))));
    let d2_after = store.dispatch(d2.id).unwrap();
    assert_eq!(d2_after.status, DispatchStatus::Completed);
    assert_eq!(d2_after.total_fob_ars, Some(Money::new(dec!(500_000))));

    // The recap names every figure the operator reviewed.
    let rendered = recap.render();
    assert!(rendered.contains("2.214.000,00"));
    assert!(rendered.contains("D1"));
    assert!(rendered.contains("D2"));
}

#[tokio::test]
async fn failed_row_aborts_whole_commit_and_statuses_stay() {
    let store = InMemoryStore::new();
    let (d1, d2, a, _b, c) = seed_scenario(&store);
    let ingestion = ingestion_for(&d1, &d2);

    // Make the last row of the batch fail.
    store.fail_updates_for(c.id);

    let confirmed = match Wizard::start().select_primary(d1.clone()) {
        Selection::Confirmed(w) => w,
        Selection::Resumed(_) => unreachable!(),
    };
    let mut costs = confirmed
        .pair_secondary(d2.clone())
        .unwrap()
        .begin_upload()
        .upload(&ingestion, document("d1.xlsx"), Some(document("d2.xlsx")))
        .await
        .unwrap();
    costs.set_exchange_rate(dec!(1000)).unwrap();
    costs
        .set_cost(CostCategory::Freight, Money::new(dec!(300000)))
        .unwrap();
    costs.compute_margin().unwrap();

    let failure = costs.commit(&store).await.err().expect("commit must fail");
    assert!(matches!(failure.error, costeo::CosteoError::ExternalService(_)));

    // Nothing moved: no prices written, the stored statuses stayed where
    // they were seeded.
    assert_eq!(store.product(a.id).unwrap().price, None);
    assert_eq!(store.product(c.id).unwrap().price, None);
    assert_eq!(store.dispatch(d1.id).unwrap().status, DispatchStatus::Open);
    assert_eq!(store.dispatch(d2.id).unwrap().status, DispatchStatus::Open);

    // The run is handed back; the operator can retry once the fault clears.
    let retry = *failure.wizard;
    assert!(retry.state.pool.margin_reviewed());
}

#[tokio::test]
async fn commit_requires_explicit_margin_review() {
    let store = InMemoryStore::new();

    let mut costs = match Wizard::start()
        .select_primary(dispatch("D1", DispatchStatus::Pending, dec!(1000)))
    {
        Selection::Resumed(w) => *w,
        Selection::Confirmed(_) => unreachable!(),
    };
    costs.set_exchange_rate(dec!(1000)).unwrap();

    // Rejected before any store access: margin was never reviewed.
    let failure = costs.commit(&store).await.err().expect("commit must fail");
    assert!(matches!(failure.error, costeo::CosteoError::Validation(_)));
}

#[tokio::test]
async fn zero_pooled_fob_rejects_before_any_write() {
    let store = InMemoryStore::new();
    let d1 = dispatch("D9", DispatchStatus::Open, dec!(0));
    store.insert_dispatch(d1.clone());
    let free = product("Z", 4, dec!(0), "D9");
    store.insert_product(free.clone());

    let ingestion = MockIngestionClient::new();
    ingestion.add_receipt(
        "D9",
        IngestionReceipt {
            dispatch_id: d1.id,
            total_fob_foreign: Money::ZERO,
        },
    );

    let confirmed = match Wizard::start().select_primary(d1.clone()) {
        Selection::Confirmed(w) => w,
        Selection::Resumed(_) => unreachable!(),
    };
    let mut costs = confirmed
        .begin_upload()
        .upload(&ingestion, document("d9.xlsx"), None)
        .await
        .unwrap();
    costs.set_exchange_rate(dec!(1000)).unwrap();
    costs
        .set_cost(CostCategory::Freight, Money::new(dec!(5000)))
        .unwrap();
    costs.compute_margin().unwrap();

    let failure = costs.commit(&store).await.err().expect("commit must fail");
    assert!(matches!(failure.error, costeo::CosteoError::Validation(_)));
    assert_eq!(store.product(free.id).unwrap().price, None);
    assert_eq!(store.dispatch(d1.id).unwrap().status, DispatchStatus::Open);
}

#[tokio::test]
async fn lease_contention_on_pending_resume() {
    let store = InMemoryStore::new();
    let pending = dispatch("D5", DispatchStatus::Pending, dec!(300));
    store.insert_dispatch(pending.clone());
    store.insert_product(product("P", 3, dec!(100), "D5"));

    let other = RunId::new();
    store
        .acquire_lease(&DispatchNumber::from("D5"), other, 60_000)
        .await
        .unwrap();

    let mut costs = match Wizard::start().select_primary(pending.clone()) {
        Selection::Resumed(w) => *w,
        Selection::Confirmed(_) => unreachable!(),
    };
    costs.set_exchange_rate(dec!(100)).unwrap();
    costs.compute_margin().unwrap();

    let failure = costs.commit(&store).await.err().expect("lease is held");
    assert!(matches!(failure.error, costeo::CosteoError::LeaseHeld(_)));
    assert_eq!(
        store.dispatch(pending.id).unwrap().status,
        DispatchStatus::Pending
    );

    // Once the other run releases, the retry goes through.
    let lease = costeo::Lease {
        dispatch_number: DispatchNumber::from("D5"),
        holder: other,
        acquired_at: chrono::Utc::now(),
        expires_at: chrono::Utc::now(),
    };
    store.release_lease(&lease).await.unwrap();

    let retry = *failure.wizard;
    let committed = retry.commit(&store).await.unwrap();
    assert_eq!(committed.summary().lines_updated, 1);
    assert_eq!(
        store.dispatch(pending.id).unwrap().status,
        DispatchStatus::Completed
    );
}

#[tokio::test]
async fn overlapping_pools_contend_on_the_shared_dispatch() {
    let store = InMemoryStore::new();
    let (d1, d2, a, _b, _c) = seed_scenario(&store);
    let ingestion = ingestion_for(&d1, &d2);

    // Another run holds D1 alone. The dual pool {D1, D2} shares that
    // dispatch, so its commit must back off instead of interleaving writes
    // to D1's product lines.
    let other = RunId::new();
    store
        .acquire_lease(&DispatchNumber::from("D1"), other, 60_000)
        .await
        .unwrap();

    let confirmed = match Wizard::start().select_primary(d1.clone()) {
        Selection::Confirmed(w) => w,
        Selection::Resumed(_) => unreachable!(),
    };
    let mut costs = confirmed
        .pair_secondary(d2.clone())
        .unwrap()
        .begin_upload()
        .upload(&ingestion, document("d1.xlsx"), Some(document("d2.xlsx")))
        .await
        .unwrap();
    costs.set_exchange_rate(dec!(1000)).unwrap();
    costs.compute_margin().unwrap();

    let failure = costs.commit(&store).await.err().expect("dispatch is held");
    assert!(matches!(failure.error, costeo::CosteoError::LeaseHeld(_)));
    assert_eq!(store.product(a.id).unwrap().price, None);
    assert_eq!(store.dispatch(d1.id).unwrap().status, DispatchStatus::Open);
    assert_eq!(store.dispatch(d2.id).unwrap().status, DispatchStatus::Open);

    // Release the single dispatch and the dual run goes through.
    let lease = costeo::Lease {
        dispatch_number: DispatchNumber::from("D1"),
        holder: other,
        acquired_at: chrono::Utc::now(),
        expires_at: chrono::Utc::now(),
    };
    store.release_lease(&lease).await.unwrap();
    let committed = (*failure.wizard).commit(&store).await.unwrap();
    assert_eq!(committed.summary().lines_updated, 3);
}

#[tokio::test]
async fn failed_lease_acquisition_hands_back_earlier_leases() {
    let store = InMemoryStore::new();
    let (d1, d2, _a, _b, _c) = seed_scenario(&store);
    let ingestion = ingestion_for(&d1, &d2);

    // Hold only D2: the dual commit takes D1 first (sorted order), fails on
    // D2, and must not keep D1 leased.
    let other = RunId::new();
    store
        .acquire_lease(&DispatchNumber::from("D2"), other, 60_000)
        .await
        .unwrap();

    let confirmed = match Wizard::start().select_primary(d1.clone()) {
        Selection::Confirmed(w) => w,
        Selection::Resumed(_) => unreachable!(),
    };
    let mut costs = confirmed
        .pair_secondary(d2.clone())
        .unwrap()
        .begin_upload()
        .upload(&ingestion, document("d1.xlsx"), Some(document("d2.xlsx")))
        .await
        .unwrap();
    costs.set_exchange_rate(dec!(1000)).unwrap();
    costs.compute_margin().unwrap();

    let failure = costs.commit(&store).await.err().expect("dispatch is held");
    assert!(matches!(failure.error, costeo::CosteoError::LeaseHeld(_)));

    // D1 is free again for a different run.
    let third = RunId::new();
    store
        .acquire_lease(&DispatchNumber::from("D1"), third, 1_000)
        .await
        .unwrap();
}

#[tokio::test]
async fn completed_dispatch_status_never_regresses() {
    let store = InMemoryStore::new();
    let d = dispatch("D11", DispatchStatus::Completed, dec!(10));
    store.insert_dispatch(d.clone());

    let err = store
        .update_status(d.id, DispatchStatus::Pending, None)
        .await
        .unwrap_err();
    assert!(matches!(err, costeo::CosteoError::InvalidState(..)));
    assert_eq!(
        store.dispatch(d.id).unwrap().status,
        DispatchStatus::Completed
    );

    // Re-running an allocation writes completed over completed; that stays
    // legal.
    store
        .update_status(d.id, DispatchStatus::Completed, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn committed_group_mirrors_catalog_fob_totals() {
    let store = InMemoryStore::new();
    // Ingestion reported 999 but the catalog rows sum to 300; the persisted
    // totals follow the catalog and the returned run must agree with them.
    let pending = dispatch("D13", DispatchStatus::Pending, dec!(999));
    store.insert_dispatch(pending.clone());
    store.insert_product(product("K", 3, dec!(100), "D13"));

    let mut costs = match Wizard::start().select_primary(pending.clone()) {
        Selection::Resumed(w) => *w,
        Selection::Confirmed(_) => unreachable!(),
    };
    costs.set_exchange_rate(dec!(10)).unwrap();
    costs.compute_margin().unwrap();
    let committed = costs.commit(&store).await.unwrap();

    let in_memory = &committed.state.group.primary;
    assert_eq!(in_memory.total_fob_usd, Money::new(dec!(300)));
    assert_eq!(in_memory.total_fob_ars, Some(Money::new(dec!(3_000))));

    let stored = store.dispatch(pending.id).unwrap();
    assert_eq!(stored.total_fob_usd, in_memory.total_fob_usd);
    assert_eq!(stored.total_fob_ars, in_memory.total_fob_ars);
}

#[tokio::test]
async fn pending_dispatch_resumes_single_at_cost_entry() {
    let store = InMemoryStore::new();
    let pending = dispatch("D7", DispatchStatus::Pending, dec!(200));
    store.insert_dispatch(pending.clone());
    store.insert_product(product("X", 2, dec!(100), "D7"));

    let mut costs = match Wizard::start().select_primary(pending.clone()) {
        Selection::Resumed(w) => *w,
        Selection::Confirmed(_) => panic!("pending dispatch must resume at cost entry"),
    };
    assert!(costs.state.resumed);
    // The original pairing is not persisted; a resumed run is single-dispatch.
    assert!(costs.state.group.secondary.is_none());
    assert_eq!(costs.state.pool.fob_primary_foreign(), Money::new(dec!(200)));

    costs.set_exchange_rate(dec!(500)).unwrap();
    costs.compute_margin().unwrap();
    let committed = costs.commit(&store).await.unwrap();

    // FOB 200 * 500 = 100,000; margin 23% -> 123,000 distributed to one line.
    assert_eq!(
        committed.summary().summary.total_to_distribute,
        Money::new(dec!(123_000))
    );
    assert_eq!(
        store.dispatch(pending.id).unwrap().status,
        DispatchStatus::Completed
    );
}

#[tokio::test]
async fn completed_dispatch_resumes_for_review() {
    let completed = dispatch("D8", DispatchStatus::Completed, dec!(50));
    match Wizard::start().select_primary(completed) {
        Selection::Resumed(w) => assert!(w.state.resumed),
        Selection::Confirmed(_) => panic!("completed dispatch must resume at cost entry"),
    }
}

#[tokio::test]
async fn secondary_pairing_rules() {
    let d1 = dispatch("D1", DispatchStatus::Open, dec!(100));
    let confirmed = match Wizard::start().select_primary(d1.clone()) {
        Selection::Confirmed(w) => w,
        Selection::Resumed(_) => unreachable!(),
    };

    // Self-pairing is rejected.
    let same = dispatch("D1", DispatchStatus::Open, dec!(100));
    let confirmed = match confirmed.pair_secondary(same) {
        Err(_) => match Wizard::start().select_primary(d1.clone()) {
            Selection::Confirmed(w) => w,
            Selection::Resumed(_) => unreachable!(),
        },
        Ok(_) => panic!("self-pairing must be rejected"),
    };

    // Pair then unpair returns to single-dispatch with no side effects.
    let d2 = dispatch("D2", DispatchStatus::Open, dec!(50));
    let paired = confirmed.pair_secondary(d2).unwrap();
    assert!(paired.state.group.is_dual());
    let single = paired.unpair_secondary();
    assert!(!single.state.group.is_dual());

    // The candidate list excludes the chosen primary.
    let page = costeo::DispatchPage {
        rows: vec![
            dispatch("D1", DispatchStatus::Open, dec!(100)),
            dispatch("D3", DispatchStatus::Open, dec!(10)),
        ],
        total_count: 2,
    };
    let filtered = single.filter_candidates(page);
    assert_eq!(filtered.rows.len(), 1);
    assert_eq!(filtered.rows[0].number, DispatchNumber::from("D3"));
    assert_eq!(filtered.total_count, 1);
}

#[tokio::test]
async fn dual_upload_requires_both_documents() {
    let d1 = dispatch("D1", DispatchStatus::Open, dec!(100));
    let d2 = dispatch("D2", DispatchStatus::Open, dec!(50));
    let ingestion = MockIngestionClient::new();

    let uploading = match Wizard::start().select_primary(d1) {
        Selection::Confirmed(w) => w.pair_secondary(d2).unwrap().begin_upload(),
        Selection::Resumed(_) => unreachable!(),
    };
    let err = uploading
        .upload(&ingestion, document("d1.xlsx"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, costeo::CosteoError::Validation(_)));
    // Rejected before any network call.
    assert_eq!(ingestion.upload_count(), 0);
}

#[tokio::test]
async fn create_dispatch_requires_company_association() {
    let store = InMemoryStore::new();

    let orphan = DispatchDraft {
        number: DispatchNumber::from("D100"),
        origin: "DE".to_string(),
        description: None,
        company_id: None,
    };
    let err = create_dispatch(&store, orphan).await.unwrap_err();
    assert!(matches!(err, costeo::CosteoError::Consistency(_)));

    let draft = DispatchDraft {
        number: DispatchNumber::from("D100"),
        origin: "DE".to_string(),
        description: None,
        company_id: Some(CompanyId(Uuid::new_v4())),
    };
    let created = create_dispatch(&store, draft).await.unwrap();
    assert_eq!(created.status, DispatchStatus::New);
    assert_eq!(created.total_fob_usd, Money::ZERO);
}

#[tokio::test]
async fn delete_dispatch_cascades_product_lines() {
    let store = InMemoryStore::new();
    let d = dispatch("D42", DispatchStatus::Pending, dec!(10));
    store.insert_dispatch(d.clone());
    store.insert_product(product("A", 1, dec!(5), "D42"));
    store.insert_product(product("B", 1, dec!(5), "D42"));

    // Without confirmation nothing happens.
    let err = delete_dispatch(&store, &d, false).await.unwrap_err();
    assert!(matches!(err, costeo::CosteoError::Validation(_)));
    assert!(store.dispatch(d.id).is_some());

    let removed = delete_dispatch(&store, &d, true).await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.dispatch(d.id).is_none());
    let remaining = store
        .list_by_dispatch_numbers(&[DispatchNumber::from("D42")])
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn search_pages_and_counts() {
    let store = InMemoryStore::new();
    for i in 0..5 {
        store.insert_dispatch(dispatch(
            &format!("IMP-{i}"),
            DispatchStatus::Open,
            dec!(10),
        ));
    }
    store.insert_dispatch(dispatch("OTHER", DispatchStatus::Open, dec!(10)));

    let page = store.search("IMP", 0, 2).await.unwrap();
    assert_eq!(page.rows.len(), 2);
    assert_eq!(page.total_count, 5);
    let last = store.search("IMP", 2, 2).await.unwrap();
    assert_eq!(last.rows.len(), 1);
}

#[tokio::test]
async fn commit_recomputes_margin_from_current_inputs() {
    let store = InMemoryStore::new();
    let pending = dispatch("D6", DispatchStatus::Pending, dec!(100));
    store.insert_dispatch(pending.clone());
    let line = product("M", 1, dec!(100), "D6");
    store.insert_product(line.clone());

    let mut costs = match Wizard::start().select_primary(pending) {
        Selection::Resumed(w) => *w,
        Selection::Confirmed(_) => unreachable!(),
    };
    costs.set_exchange_rate(dec!(100)).unwrap();
    costs.compute_margin().unwrap();

    // Inputs change after the margin review; commit must use the new figures,
    // not the reviewed snapshot.
    costs
        .set_cost(CostCategory::Freight, Money::new(dec!(10_000)))
        .unwrap();
    let committed = costs.commit(&store).await.unwrap();

    // (100*100 + 10000) * 1.23 = 24,600
    assert_eq!(
        committed.summary().summary.total_to_distribute,
        Money::new(dec!(24_600))
    );
    assert_eq!(
        store.product(line.id).unwrap().neto,
        Some(Money::new(dec!(24_600)))
    );
}

#[test]
fn allocator_is_reachable_standalone() {
    // The allocator is pure; callers outside the wizard can use it directly.
    let lines = vec![
        product("A", 2, dec!(50), "D1"),
        product("B", 2, dec!(150), "D1"),
    ];
    let allocated = allocate(&lines, Money::new(dec!(1000))).unwrap();
    assert_eq!(allocated[0].extended_value_local, Money::new(dec!(250)));
    assert_eq!(allocated[1].extended_value_local, Money::new(dec!(750)));
}
