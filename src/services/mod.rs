pub mod audit;
pub mod availability;
pub mod bookings;
pub mod clock;
pub mod notifications;
pub mod payments;
pub mod pricing;
