pub mod booking;
pub mod catalog;
pub mod gateway;
pub mod ledger;
pub mod locking;
pub mod notifier;
pub mod payment;
pub mod seat_allocator;
pub mod sweeper;
pub mod tickets;

pub use booking::BookingService;
pub use catalog::CatalogService;
pub use payment::PaymentService;
pub use sweeper::ExpirySweeper;
pub use tickets::TicketService;
