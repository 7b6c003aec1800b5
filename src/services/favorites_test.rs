use std::sync::Arc;

use super::*;
use crate::error::ErrorCode;
use crate::state::test_helpers::{sample_space, test_app_state};

#[tokio::test]
async fn add_is_idempotent_and_attaches_the_space() {
    let state = test_app_state(vec![sample_space(1, 10, 4)]);

    let (first, created) = add(&state, "ana", 1).await.unwrap();
    assert!(created);
    assert_eq!(first.space.as_ref().map(|s| s.available_seats), Some(4));

    let (again, created) = add(&state, "ana", 1).await.unwrap();
    assert!(!created);
    assert_eq!(again.id, first.id);
    assert_eq!(list_for_user(&state, "ana").await.unwrap().len(), 1);
}

#[tokio::test]
async fn add_unknown_space_is_not_found() {
    let state = test_app_state(vec![sample_space(1, 10, 4)]);
    let err = add(&state, "ana", 42).await.unwrap_err();
    assert!(matches!(err, FavoriteError::SpaceNotFound(42)));
    assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    assert!(list_for_user(&state, "ana").await.unwrap().is_empty());
}

#[tokio::test]
async fn list_shows_current_availability_newest_first() {
    let state = test_app_state(vec![sample_space(1, 10, 4), sample_space(2, 6, 6)]);
    add(&state, "ana", 1).await.unwrap();
    add(&state, "ben", 1).await.unwrap();
    add(&state, "ana", 2).await.unwrap();
    state.registry.apply_seat_delta(1, -3).await.unwrap();

    let favorites = list_for_user(&state, "ana").await.unwrap();
    assert_eq!(favorites.iter().map(|f| f.space_id).collect::<Vec<_>>(), vec![2, 1]);
    assert_eq!(favorites[1].space.as_ref().map(|s| s.available_seats), Some(1));
    assert!(favorites.iter().all(|f| f.user_id == "ana"));
}

#[tokio::test]
async fn favorites_never_change_seats() {
    let state = test_app_state(vec![sample_space(1, 10, 4)]);
    add(&state, "ana", 1).await.unwrap();
    remove(&state, "ana", 1).await.unwrap();
    assert_eq!(state.registry.version().await, 0);
    assert_eq!(state.registry.get(1).await.unwrap().available_seats, 4);
}

#[tokio::test]
async fn remove_reports_missing_pairs() {
    let state = test_app_state(vec![sample_space(1, 10, 4)]);
    add(&state, "ana", 1).await.unwrap();

    assert!(matches!(remove(&state, "ben", 1).await, Err(FavoriteError::NotFound(1))));
    remove(&state, "ana", 1).await.unwrap();
    let err = remove(&state, "ana", 1).await.unwrap_err();
    assert_eq!(err.error_code(), "E_FAVORITE_NOT_FOUND");
}

#[tokio::test]
async fn memory_store_keeps_pairs_per_user() {
    let store = Arc::new(MemoryFavoriteStore::new());
    let (a, _) = store.add("ana", 1).await.unwrap();
    let (b, _) = store.add("ben", 1).await.unwrap();
    assert_ne!(a.id, b.id);
    assert!(store.remove("ana", 1).await.unwrap());
    assert!(!store.remove("ana", 1).await.unwrap());
    assert_eq!(store.list_for_user("ben").await.unwrap(), vec![b]);
}

#[cfg(feature = "live-db-tests")]
mod live_db {
    use super::*;

    #[tokio::test]
    async fn pg_favorites_are_unique_per_user_and_space() {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL required for live-db-tests");
        let pool = crate::db::init_pool(&url, 2).await.expect("init pool");
        crate::services::persistence::hydrate_spaces(&pool, &crate::seed::default_spaces().expect("seed"))
            .await
            .expect("hydrate");
        let store = PgFavoriteStore::new(pool);

        let user = format!("live-fav-{}", uuid::Uuid::new_v4());
        let (first, created) = store.add(&user, 1).await.unwrap();
        assert!(created);
        let (again, created) = store.add(&user, 1).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);
        assert_eq!(store.list_for_user(&user).await.unwrap().len(), 1);
        assert!(store.remove(&user, 1).await.unwrap());
        assert!(!store.remove(&user, 1).await.unwrap());
    }
}
