pub mod event;
pub mod ticket_type;
pub mod booking;
pub mod ticket;
pub mod visitor;
pub mod payment;

pub use event::{Event, EventStatus};
pub use ticket_type::{NewTicketType, TicketType, TicketTypePatch, TicketTypeStatus};
pub use booking::{Booking, BookingStatus};
pub use ticket::{Ticket, TicketStatus};
pub use visitor::{NewVisitor, Visitor, VisitorTitle};
pub use payment::{Payment, PaymentStatus};
