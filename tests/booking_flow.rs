mod common;

use uuid::Uuid;

use common::{booking_request, quota_of, seed_ticket_type, setup, visitor, TestApp};
use ticket_inventory::error::AppError;
use ticket_inventory::models::{BookingStatus, TicketStatus, TicketTypePatch, TicketTypeStatus};
use ticket_inventory::services::booking::{BookingDetails, CreateBookingRequest};
use ticket_inventory::services::notifier::NotificationKind;
use ticket_inventory::services::payment::GatewayOutcome;

async fn pay(app: &TestApp, details: &BookingDetails) {
    let payment = app
        .state
        .payments
        .initiate_payment(details.booking.id, details.booking.buyer_id, false)
        .await
        .expect("initiate payment");
    app.state
        .payments
        .apply_gateway_outcome(&payment.invoice_id, GatewayOutcome::Paid)
        .await
        .expect("paid callback");
}

#[tokio::test]
async fn booking_reserves_quota_and_allocates_seats() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 5, 150_000).await;
    let buyer = Uuid::new_v4();

    let first = app
        .state
        .bookings
        .create_booking(buyer, booking_request(ticket_type_id, 2))
        .await
        .expect("first booking");

    assert_eq!(first.booking.status, BookingStatus::Pending);
    assert_eq!(first.booking.quantity, 2);
    assert_eq!(first.booking.total_amount, 300_000);
    let seats: Vec<&str> = first.tickets.iter().map(|t| t.seat_label.as_str()).collect();
    assert_eq!(seats, vec!["A1", "A2"]);
    assert!(first.tickets.iter().all(|t| t.status == TicketStatus::Pending));
    assert_eq!(quota_of(&app, ticket_type_id).await, 3);

    let second = app
        .state
        .bookings
        .create_booking(buyer, booking_request(ticket_type_id, 1))
        .await
        .expect("second booking");
    assert_eq!(second.tickets[0].seat_label, "A3");
    assert_eq!(quota_of(&app, ticket_type_id).await, 2);

    assert!(
        app.notifier
            .wait_for(first.booking.id, NotificationKind::BookingCreated)
            .await
    );
}

#[tokio::test]
async fn insufficient_quota_leaves_nothing_behind() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 1, 10_000).await;
    let buyer = Uuid::new_v4();

    let err = app
        .state
        .bookings
        .create_booking(buyer, booking_request(ticket_type_id, 2))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InsufficientQuota { requested: 2, available: 1 }));
    assert_eq!(quota_of(&app, ticket_type_id).await, 1);
    assert!(app.state.bookings.list_for_buyer(buyer).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_ticket_type_is_not_found() {
    let Some(app) = setup().await else { return };
    let err = app
        .state
        .bookings
        .create_booking(Uuid::new_v4(), booking_request(i64::MAX, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn finished_ticket_type_rejects_bookings() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 10, 10_000).await;

    app.state
        .catalog
        .update_ticket_type(
            ticket_type_id,
            TicketTypePatch {
                status: Some(TicketTypeStatus::Finished),
                ..Default::default()
            },
        )
        .await
        .expect("finish ticket type");

    let err = app
        .state
        .bookings
        .create_booking(Uuid::new_v4(), booking_request(ticket_type_id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TicketTypeFinished(id) if id == ticket_type_id));
    assert_eq!(quota_of(&app, ticket_type_id).await, 10);
}

#[tokio::test]
async fn cancelling_pending_booking_restores_quota_once() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 4, 10_000).await;

    let details = app
        .state
        .bookings
        .create_booking(Uuid::new_v4(), booking_request(ticket_type_id, 3))
        .await
        .unwrap();
    assert_eq!(quota_of(&app, ticket_type_id).await, 1);

    let cancelled = app
        .state
        .bookings
        .update_booking_status(details.booking.id, BookingStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
    assert!(cancelled.tickets.iter().all(|t| t.status == TicketStatus::Cancelled));
    assert_eq!(quota_of(&app, ticket_type_id).await, 4);

    let again = app
        .state
        .bookings
        .update_booking_status(details.booking.id, BookingStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(again, AppError::Conflict(_)));
    assert_eq!(quota_of(&app, ticket_type_id).await, 4);
}

#[tokio::test]
async fn cancelled_seats_can_be_sold_again() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 2, 10_000).await;

    let first = app
        .state
        .bookings
        .create_booking(Uuid::new_v4(), booking_request(ticket_type_id, 2))
        .await
        .unwrap();
    app.state
        .bookings
        .update_booking_status(first.booking.id, BookingStatus::Cancelled)
        .await
        .unwrap();

    let second = app
        .state
        .bookings
        .create_booking(Uuid::new_v4(), booking_request(ticket_type_id, 2))
        .await
        .unwrap();
    let seats: Vec<&str> = second.tickets.iter().map(|t| t.seat_label.as_str()).collect();
    assert_eq!(seats, vec!["A1", "A2"]);
}

#[tokio::test]
async fn refund_requires_paid_booking() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 3, 10_000).await;
    let details = app
        .state
        .bookings
        .create_booking(Uuid::new_v4(), booking_request(ticket_type_id, 1))
        .await
        .unwrap();

    let err = app
        .state
        .bookings
        .update_booking_status(details.booking.id, BookingStatus::Refunded)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    pay(&app, &details).await;
    let refunded = app
        .state
        .bookings
        .update_booking_status(details.booking.id, BookingStatus::Refunded)
        .await
        .unwrap();
    assert_eq!(refunded.booking.status, BookingStatus::Refunded);
    assert!(refunded.tickets.iter().all(|t| t.status == TicketStatus::Cancelled));
    assert_eq!(quota_of(&app, ticket_type_id).await, 3);
    assert!(
        app.notifier
            .wait_for(details.booking.id, NotificationKind::BookingRefunded)
            .await
    );
}

#[tokio::test]
async fn used_tickets_keep_their_quota_on_cancellation() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 5, 10_000).await;
    let details = app
        .state
        .bookings
        .create_booking(Uuid::new_v4(), booking_request(ticket_type_id, 2))
        .await
        .unwrap();
    pay(&app, &details).await;

    let paid = app
        .state
        .bookings
        .get_booking(details.booking.id, details.booking.buyer_id, false)
        .await
        .unwrap();
    assert_eq!(paid.booking.status, BookingStatus::Paid);
    assert!(paid.tickets.iter().all(|t| t.status == TicketStatus::Valid));

    let checked_in = app
        .state
        .tickets
        .update_ticket_status(paid.tickets[0].id, TicketStatus::Used)
        .await
        .unwrap();
    assert_eq!(checked_in.status, TicketStatus::Used);
    assert!(checked_in.checked_in_at.is_some());
    assert_eq!(quota_of(&app, ticket_type_id).await, 3);

    let cancelled = app
        .state
        .bookings
        .update_booking_status(details.booking.id, BookingStatus::Cancelled)
        .await
        .unwrap();
    let used = cancelled.tickets.iter().find(|t| t.id == checked_in.id).unwrap();
    assert_eq!(used.status, TicketStatus::Used);
    assert_eq!(quota_of(&app, ticket_type_id).await, 4);
}

#[tokio::test]
async fn single_ticket_cancellation_releases_one_unit() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 5, 10_000).await;
    let details = app
        .state
        .bookings
        .create_booking(Uuid::new_v4(), booking_request(ticket_type_id, 2))
        .await
        .unwrap();

    let ticket = app
        .state
        .tickets
        .update_ticket_status(details.tickets[1].id, TicketStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Cancelled);
    assert_eq!(quota_of(&app, ticket_type_id).await, 4);

    let err = app
        .state
        .tickets
        .update_ticket_status(details.tickets[1].id, TicketStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(quota_of(&app, ticket_type_id).await, 4);
}

#[tokio::test]
async fn visitors_are_reused_by_national_id() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 5, 10_000).await;
    let buyer = Uuid::new_v4();
    let shared = visitor();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let details = app
            .state
            .bookings
            .create_booking(
                buyer,
                CreateBookingRequest {
                    ticket_type_id,
                    quantity: 1,
                    visitors: vec![shared.clone()],
                },
            )
            .await
            .unwrap();
        ids.push(details.tickets[0].visitor_id);
    }
    assert_eq!(ids[0], ids[1]);
}

#[tokio::test]
async fn other_buyers_cannot_read_a_booking() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 5, 10_000).await;
    let owner = Uuid::new_v4();
    let details = app
        .state
        .bookings
        .create_booking(owner, booking_request(ticket_type_id, 1))
        .await
        .unwrap();

    let err = app
        .state
        .bookings
        .get_booking(details.booking.id, Uuid::new_v4(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let ticket_err = app
        .state
        .tickets
        .get_ticket(details.tickets[0].id, Uuid::new_v4(), false)
        .await
        .unwrap_err();
    assert!(matches!(ticket_err, AppError::Forbidden(_)));

    // админ видит все
    assert!(app
        .state
        .bookings
        .get_booking(details.booking.id, Uuid::new_v4(), true)
        .await
        .is_ok());
}

#[tokio::test]
async fn ticket_type_with_paid_bookings_is_frozen() {
    let Some(app) = setup().await else { return };
    let ticket_type_id = seed_ticket_type(&app, 5, 10_000).await;
    let details = app
        .state
        .bookings
        .create_booking(Uuid::new_v4(), booking_request(ticket_type_id, 1))
        .await
        .unwrap();
    pay(&app, &details).await;

    let err = app
        .state
        .catalog
        .update_ticket_type(
            ticket_type_id,
            TicketTypePatch {
                price: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}
