use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use ecocab_dispatch::{DispatchEngine, DispatchOutcome, ExpirySweeper, ReservationLedger, RideLifecycle};
use ecocab_domain::{
    Clock, Device, DeviceRegistry, ManualClock, RegistryError, RideError, RideEvent, RideRequest,
    RideStatus, RideStore, VehicleStatus,
};
use ecocab_shared::Coordinates;
use ecocab_store::{MemoryDeviceRegistry, MemoryRideStore};
use uuid::Uuid;

const WINDOW_SECS: i64 = 300;

struct Harness {
    registry: Arc<MemoryDeviceRegistry>,
    rides: Arc<MemoryRideStore>,
    clock: Arc<ManualClock>,
    engine: Arc<DispatchEngine>,
    lifecycle: RideLifecycle,
    sweeper: ExpirySweeper,
}

fn harness() -> Harness {
    let registry = Arc::new(MemoryDeviceRegistry::new());
    let rides = Arc::new(MemoryRideStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    ));
    let engine = Arc::new(DispatchEngine::new(
        registry.clone(),
        rides.clone(),
        clock.clone(),
        Duration::seconds(WINDOW_SECS),
    ));
    let lifecycle = RideLifecycle::new(
        rides.clone(),
        registry.clone(),
        engine.clone(),
        clock.clone(),
    );
    let sweeper = ExpirySweeper::new(rides.clone(), engine.clone(), clock.clone());
    Harness {
        registry,
        rides,
        clock,
        engine,
        lifecycle,
        sweeper,
    }
}

impl Harness {
    async fn add_vehicle(&self, lat: f64, lon: f64, seats: u32) -> Uuid {
        let id = Uuid::new_v4();
        self.registry
            .insert(Device::vehicle(id, None, seats, self.clock.now()))
            .await
            .unwrap();
        self.registry
            .update_location(id, Coordinates::new(lat, lon))
            .await
            .unwrap();
        id
    }

    async fn add_passenger(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.registry
            .insert(Device::passenger(id, None, self.clock.now()))
            .await
            .unwrap();
        id
    }

    /// Insert a pending ride from (0, 0) and run dispatch on it.
    async fn request_ride(&self, passenger_id: Uuid, seats: u32) -> (RideRequest, DispatchOutcome) {
        let mut ride = RideRequest::new(
            passenger_id,
            Coordinates::new(0.0, 0.0),
            Coordinates::new(1.0, 1.0),
            seats,
            self.clock.now(),
            Duration::seconds(WINDOW_SECS),
        );
        self.rides.insert(&ride).await.unwrap();
        let outcome = self.engine.dispatch(&mut ride).await.unwrap();
        (ride, outcome)
    }

    async fn vehicle_state(&self, id: Uuid) -> (VehicleStatus, u32) {
        let device = self.registry.get(id).await.unwrap().unwrap();
        (
            device.vehicle_status().unwrap(),
            device.seats_available().unwrap(),
        )
    }
}

#[tokio::test]
async fn test_nearest_vehicle_wins() {
    let h = harness();
    let near = h.add_vehicle(0.0, 0.001, 4).await;
    let _far = h.add_vehicle(0.0, 1.0, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, outcome) = h.request_ride(passenger, 2).await;

    assert_eq!(outcome, DispatchOutcome::Assigned { vehicle_id: near });
    assert_eq!(ride.status, RideStatus::Reserved);
    assert_eq!(ride.vehicle_id, Some(near));

    let (status, seats) = h.vehicle_state(near).await;
    assert_eq!(status, VehicleStatus::Reserved);
    assert_eq!(seats, 2);

    // The stored row matches what dispatch handed back.
    let stored = h.rides.get(ride.id).await.unwrap().unwrap();
    assert_eq!(stored, ride);
}

#[tokio::test]
async fn test_no_vehicle_leaves_ride_pending() {
    let h = harness();
    let passenger = h.add_passenger().await;

    let (ride, outcome) = h.request_ride(passenger, 1).await;

    assert_eq!(outcome, DispatchOutcome::Unavailable);
    assert_eq!(ride.status, RideStatus::Pending);
    assert_eq!(ride.vehicle_id, None);
}

#[tokio::test]
async fn test_unlocated_vehicle_is_never_matched() {
    let h = harness();
    let id = Uuid::new_v4();
    h.registry
        .insert(Device::vehicle(id, None, 4, h.clock.now()))
        .await
        .unwrap();
    let passenger = h.add_passenger().await;

    let (_, outcome) = h.request_ride(passenger, 1).await;
    assert_eq!(outcome, DispatchOutcome::Unavailable);
}

#[tokio::test]
async fn test_reject_excludes_vehicle_and_moves_to_next() {
    let h = harness();
    let first = h.add_vehicle(0.0, 0.001, 4).await;
    let second = h.add_vehicle(0.0, 1.0, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 2).await;
    assert_eq!(ride.vehicle_id, Some(first));

    let after = h.lifecycle.apply(ride.id, RideEvent::Reject).await.unwrap();

    assert_eq!(after.status, RideStatus::Reserved);
    assert_eq!(after.vehicle_id, Some(second));
    assert!(after.excluded_vehicles.contains(&first));

    // The rejecting vehicle got its seats back.
    let (status, seats) = h.vehicle_state(first).await;
    assert_eq!(status, VehicleStatus::Waiting);
    assert_eq!(seats, 4);
    let (status, seats) = h.vehicle_state(second).await;
    assert_eq!(status, VehicleStatus::Reserved);
    assert_eq!(seats, 2);
}

#[tokio::test]
async fn test_reject_with_no_alternative_expires_the_ride() {
    let h = harness();
    let only = h.add_vehicle(0.0, 0.001, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 2).await;
    let after = h.lifecycle.apply(ride.id, RideEvent::Reject).await.unwrap();

    assert_eq!(after.status, RideStatus::Expired);
    assert_eq!(after.vehicle_id, None);
    let (status, seats) = h.vehicle_state(only).await;
    assert_eq!(status, VehicleStatus::Waiting);
    assert_eq!(seats, 4);
}

#[tokio::test]
async fn test_concurrent_requests_get_exactly_one_assignment() {
    let h = harness();
    h.add_vehicle(0.0, 0.001, 2).await;
    let p1 = h.add_passenger().await;
    let p2 = h.add_passenger().await;

    let mut ride_a = RideRequest::new(
        p1,
        Coordinates::new(0.0, 0.0),
        Coordinates::new(1.0, 1.0),
        2,
        h.clock.now(),
        Duration::seconds(WINDOW_SECS),
    );
    let mut ride_b = RideRequest::new(
        p2,
        Coordinates::new(0.0, 0.0),
        Coordinates::new(1.0, 1.0),
        2,
        h.clock.now(),
        Duration::seconds(WINDOW_SECS),
    );
    h.rides.insert(&ride_a).await.unwrap();
    h.rides.insert(&ride_b).await.unwrap();

    let (ra, rb) = tokio::join!(h.engine.dispatch(&mut ride_a), h.engine.dispatch(&mut ride_b));
    let outcomes = [ra.unwrap(), rb.unwrap()];

    let assigned = outcomes
        .iter()
        .filter(|o| matches!(o, DispatchOutcome::Assigned { .. }))
        .count();
    assert_eq!(assigned, 1, "both rides won the same seats: {outcomes:?}");
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == DispatchOutcome::Unavailable)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_vehicle_holding_seats_cannot_be_returned_to_waiting() {
    let h = harness();
    let vehicle = h.add_vehicle(0.0, 0.001, 4).await;
    let p1 = h.add_passenger().await;
    let p2 = h.add_passenger().await;

    let (first, _) = h.request_ride(p1, 2).await;
    assert_eq!(first.vehicle_id, Some(vehicle));

    // A duty toggle must not make the vehicle matchable while it holds a
    // live reservation.
    let err = h
        .registry
        .set_vehicle_status(vehicle, VehicleStatus::Waiting)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ReservationsHeld { .. }));

    let (second, outcome) = h.request_ride(p2, 2).await;
    assert_eq!(
        outcome,
        DispatchOutcome::Unavailable,
        "two rides won the same vehicle"
    );
    assert_eq!(second.vehicle_id, None);
}

#[tokio::test]
async fn test_seats_conserved_across_full_lifecycle() {
    let h = harness();
    let vehicle = h.add_vehicle(0.0, 0.001, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 3).await;

    let ride = h.lifecycle.apply(ride.id, RideEvent::Accept).await.unwrap();
    assert_eq!(ride.status, RideStatus::Accepted);
    let (_, seats) = h.vehicle_state(vehicle).await;
    assert_eq!(seats, 1, "acceptance must not debit a second time");

    let ride = h.lifecycle.apply(ride.id, RideEvent::Start).await.unwrap();
    assert_eq!(ride.status, RideStatus::EnRoute);
    let (status, _) = h.vehicle_state(vehicle).await;
    assert_eq!(status, VehicleStatus::EnRoute);

    let ride = h
        .lifecycle
        .apply(ride.id, RideEvent::Complete)
        .await
        .unwrap();
    assert_eq!(ride.status, RideStatus::Completed);
    // Vehicle reference survives for history.
    assert_eq!(ride.vehicle_id, Some(vehicle));

    let (status, seats) = h.vehicle_state(vehicle).await;
    assert_eq!(status, VehicleStatus::Waiting);
    assert_eq!(seats, 4);
}

#[tokio::test]
async fn test_cancel_after_accept_releases_seats() {
    let h = harness();
    let vehicle = h.add_vehicle(0.0, 0.001, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 2).await;
    h.lifecycle.apply(ride.id, RideEvent::Accept).await.unwrap();
    let ride = h.lifecycle.apply(ride.id, RideEvent::Cancel).await.unwrap();

    assert_eq!(ride.status, RideStatus::Cancelled);
    assert_eq!(ride.vehicle_id, None);
    let (status, seats) = h.vehicle_state(vehicle).await;
    assert_eq!(status, VehicleStatus::Waiting);
    assert_eq!(seats, 4);
}

#[tokio::test]
async fn test_cancel_illegal_while_reserved() {
    let h = harness();
    h.add_vehicle(0.0, 0.001, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 1).await;
    let err = h
        .lifecycle
        .apply(ride.id, RideEvent::Cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RideError::InvalidTransition {
            from: RideStatus::Reserved,
            to: RideStatus::Cancelled,
        }
    ));
}

#[tokio::test]
async fn test_terminal_ride_rejects_every_event() {
    let h = harness();
    h.add_vehicle(0.0, 0.001, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 1).await;
    h.lifecycle.apply(ride.id, RideEvent::Accept).await.unwrap();
    h.lifecycle.apply(ride.id, RideEvent::Start).await.unwrap();
    h.lifecycle
        .apply(ride.id, RideEvent::Complete)
        .await
        .unwrap();

    for event in [
        RideEvent::Accept,
        RideEvent::Start,
        RideEvent::Reject,
        RideEvent::Cancel,
        RideEvent::Complete,
    ] {
        let err = h.lifecycle.apply(ride.id, event).await.unwrap_err();
        assert!(
            matches!(err, RideError::InvalidTransition { .. }),
            "{event:?} must be illegal after completion, got {err:?}"
        );
    }
}

#[tokio::test]
async fn test_unknown_ride_is_not_found() {
    let h = harness();
    let err = h
        .lifecycle
        .apply(Uuid::new_v4(), RideEvent::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, RideError::RideNotFound(_)));
}

#[tokio::test]
async fn test_sweep_redispatches_an_expired_reservation() {
    let h = harness();
    let slow = h.add_vehicle(0.0, 0.001, 4).await;
    let other = h.add_vehicle(0.0, 1.0, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 2).await;
    assert_eq!(ride.vehicle_id, Some(slow));

    h.clock.advance(Duration::seconds(WINDOW_SECS + 1));
    let report = h.sweeper.sweep_once().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.redispatched, 1);
    assert_eq!(report.expired, 0);

    let ride = h.rides.get(ride.id).await.unwrap().unwrap();
    assert_eq!(ride.status, RideStatus::Reserved);
    assert_eq!(ride.vehicle_id, Some(other));
    assert!(ride.excluded_vehicles.contains(&slow));
    // The new reservation gets a fresh deadline.
    assert!(ride.expires_at > h.clock.now());

    let (status, seats) = h.vehicle_state(slow).await;
    assert_eq!(status, VehicleStatus::Waiting);
    assert_eq!(seats, 4);
}

#[tokio::test]
async fn test_sweep_expires_a_ride_nobody_can_serve() {
    let h = harness();
    let only = h.add_vehicle(0.0, 0.001, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 2).await;
    h.clock.advance(Duration::seconds(WINDOW_SECS + 1));
    let report = h.sweeper.sweep_once().await.unwrap();

    assert_eq!(report.expired, 1);
    let ride = h.rides.get(ride.id).await.unwrap().unwrap();
    assert_eq!(ride.status, RideStatus::Expired);
    assert_eq!(ride.vehicle_id, None);
    let (_, seats) = h.vehicle_state(only).await;
    assert_eq!(seats, 4);
}

#[tokio::test]
async fn test_sweep_ignores_fresh_rides() {
    let h = harness();
    h.add_vehicle(0.0, 0.001, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 1).await;
    let report = h.sweeper.sweep_once().await.unwrap();

    assert_eq!(report.scanned, 0);
    let stored = h.rides.get(ride.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Reserved);
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let h = harness();
    h.add_vehicle(0.0, 0.001, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 2).await;
    h.clock.advance(Duration::seconds(WINDOW_SECS + 1));

    h.sweeper.sweep_once().await.unwrap();
    let expired = h.rides.get(ride.id).await.unwrap().unwrap();
    assert_eq!(expired.status, RideStatus::Expired);

    // A second pass finds nothing to do and changes nothing.
    let report = h.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(h.rides.get(ride.id).await.unwrap().unwrap(), expired);
}

#[tokio::test]
async fn test_fetch_enforces_expiry_lazily() {
    let h = harness();
    let passenger = h.add_passenger().await;

    let (ride, outcome) = h.request_ride(passenger, 1).await;
    assert_eq!(outcome, DispatchOutcome::Unavailable);

    h.clock.advance(Duration::seconds(WINDOW_SECS + 1));
    let fetched = h.lifecycle.fetch(ride.id).await.unwrap();

    // No vehicle ever existed, so the stale pending ride expires on read.
    assert_eq!(fetched.status, RideStatus::Expired);
    assert_eq!(
        h.rides.get(ride.id).await.unwrap().unwrap().status,
        RideStatus::Expired
    );
}

#[tokio::test]
async fn test_fetch_returns_live_rides_untouched() {
    let h = harness();
    h.add_vehicle(0.0, 0.001, 4).await;
    let passenger = h.add_passenger().await;

    let (ride, _) = h.request_ride(passenger, 1).await;
    let fetched = h.lifecycle.fetch(ride.id).await.unwrap();
    assert_eq!(fetched, h.rides.get(ride.id).await.unwrap().unwrap());
    assert_eq!(fetched.status, RideStatus::Reserved);
}

#[tokio::test]
async fn test_release_without_vehicle_is_a_noop() {
    let h = harness();
    let ledger = ReservationLedger::new(h.registry.clone());
    ledger.release(None, 3).await.unwrap();
    // A vehicle that deregistered mid-ride must not fail the transition.
    ledger.release(Some(Uuid::new_v4()), 3).await.unwrap();
}

#[tokio::test]
async fn test_release_never_credits_above_total() {
    let h = harness();
    let vehicle = h.add_vehicle(0.0, 0.001, 2).await;
    let ledger = ReservationLedger::new(h.registry.clone());

    ledger.release(Some(vehicle), 5).await.unwrap();
    let (_, seats) = h.vehicle_state(vehicle).await;
    assert_eq!(seats, 2);
}
