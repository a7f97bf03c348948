use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use statreg_core::error::StoreError;
use statreg_core::history::{ChangeReason, HistorySnapshot};
use statreg_core::reference::{Activity, ActivityType, Address, CodeRef, Person};
use statreg_core::store::UnitStore;
use statreg_core::types::DbId;
use statreg_core::unit::{LinkRef, StatUnit, UnitType};
use statreg_db::PgStore;

fn legal(stat_id: &str) -> StatUnit {
    let mut unit = StatUnit::new(UnitType::LegalUnit, Utc::now());
    unit.stat_id = Some(stat_id.into());
    unit.name = Some("Oblstroy".into());
    unit.user_id = Some("importer".into());
    unit
}

/// Persist `unit` with one address, one activity and one person.
async fn create(store: &PgStore, mut unit: StatUnit) -> StatUnit {
    let mut tx = store.begin().await.unwrap();
    let mut address = Address {
        address_part1: Some("Chui 12".into()),
        ..Address::default()
    };
    address.id = tx.save_address(&address).await.unwrap();
    let mut activity = Activity {
        activity_type: ActivityType::Primary,
        category: CodeRef {
            id: 10,
            ..CodeRef::default()
        },
        employees: Some(4),
        ..Activity::default()
    };
    activity.id = tx.save_activity(&activity).await.unwrap();
    let mut person = Person {
        given_name: Some("Aida".into()),
        surname: Some("Bekova".into()),
        personal_id: Some("P-1".into()),
        ..Person::default()
    };
    person.id = tx.save_person(&person).await.unwrap();

    unit.address = Some(address);
    unit.activities = vec![activity];
    unit.persons = vec![person];
    unit.reg_id = tx.insert_unit(&unit).await.unwrap();
    tx.replace_unit_links(&unit).await.unwrap();
    tx.commit().await.unwrap();
    unit
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_unit_round_trip_with_children(pool: PgPool) {
    let store = PgStore::new(pool);
    let created = create(&store, legal("100")).await;

    let found = store
        .find_by_stat_id(UnitType::LegalUnit, "100")
        .await
        .unwrap()
        .expect("unit by stat id");
    assert_eq!(found.reg_id, created.reg_id);
    assert_eq!(found.name.as_deref(), Some("Oblstroy"));
    assert_eq!(found.address.as_ref().and_then(|a| a.address_part1.as_deref()), Some("Chui 12"));
    assert_eq!(found.activity_ids(), created.activity_ids());
    assert_eq!(found.persons[0].surname.as_deref(), Some("Bekova"));

    let address = created.address.clone().unwrap();
    assert_eq!(store.find_address(&address).await.unwrap(), Some(address.id));
    assert_eq!(
        store
            .find_activity(created.reg_id, 10, ActivityType::Primary)
            .await
            .unwrap(),
        Some(created.activities[0].id)
    );
    let wanted = Person {
        personal_id: Some("P-1".into()),
        ..Person::default()
    };
    assert_eq!(store.find_person(&wanted).await.unwrap(), Some(created.persons[0].id));

    assert!(store
        .find_by_stat_id(UnitType::EnterpriseUnit, "100")
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_duplicate_stat_id_conflicts(pool: PgPool) {
    let store = PgStore::new(pool);
    create(&store, legal("200")).await;

    let mut tx = store.begin().await.unwrap();
    let err = tx.insert_unit(&legal("200")).await.unwrap_err();
    assert_matches!(err, StoreError::Conflict(_));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_dropped_transaction_rolls_back(pool: PgPool) {
    let store = PgStore::new(pool);
    {
        let mut tx = store.begin().await.unwrap();
        tx.insert_unit(&legal("300")).await.unwrap();
    }
    assert!(store
        .find_by_stat_id(UnitType::LegalUnit, "300")
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_children_and_update(pool: PgPool) {
    let store = PgStore::new(pool);
    let parent = create(&store, legal("400")).await;

    let mut local = StatUnit::new(UnitType::LocalUnit, Utc::now());
    local.stat_id = Some("401".into());
    local.legal_unit = Some(LinkRef::RegId(parent.reg_id));
    let mut tx = store.begin().await.unwrap();
    local.reg_id = tx.insert_unit(&local).await.unwrap();
    tx.commit().await.unwrap();

    let children = store.children_of(UnitType::LegalUnit, parent.reg_id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].reg_id, local.reg_id);

    local.name = Some("Branch".into());
    let mut tx = store.begin().await.unwrap();
    tx.update_unit(&local).await.unwrap();
    tx.commit().await.unwrap();
    let reloaded = store
        .find_by_reg_id(UnitType::LocalUnit, local.reg_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.name.as_deref(), Some("Branch"));

    let mut tx = store.begin().await.unwrap();
    tx.delete_unit(UnitType::LocalUnit, local.reg_id).await.unwrap();
    let err = tx.delete_unit(UnitType::LocalUnit, local.reg_id).await.unwrap_err();
    assert_matches!(err, StoreError::NotFound { .. });
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_history_and_earliest_period(pool: PgPool) {
    let store = PgStore::new(pool);
    let mut unit = legal("500");
    unit.start_period = Utc::now() - Duration::days(1);
    let unit = create(&store, unit).await;

    let earlier = Utc::now() - Duration::days(30);
    let mut prior = unit.clone();
    prior.start_period = earlier;
    let snapshot = HistorySnapshot::of(&prior, unit.start_period, ChangeReason::Edit, None, "importer");

    let mut tx = store.begin().await.unwrap();
    let history_id: DbId = tx.insert_history(&snapshot).await.unwrap();
    tx.set_history_child_ids(UnitType::LegalUnit, unit.reg_id, &unit.activity_ids())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let history = store.history_of(UnitType::LegalUnit, unit.reg_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, history_id);
    assert_eq!(history[0].change_reason, ChangeReason::Edit);
    assert_eq!(history[0].state.name.as_deref(), Some("Oblstroy"));

    let earliest = store
        .earliest_start_period(UnitType::LegalUnit, unit.reg_id)
        .await
        .unwrap()
        .unwrap();
    assert!((earliest - earlier).num_seconds().abs() < 1);

    let reloaded = store
        .find_by_reg_id(UnitType::LegalUnit, unit.reg_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.history_child_ids, unit.activity_ids());
}
