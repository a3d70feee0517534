pub mod billing_profile;
pub mod booking;
pub mod booking_status_history;
pub mod driver;
pub mod extension_request;
pub mod invoice;
pub mod quote;
pub mod settlement_discrepancy;

pub use billing_profile::{
    payment_method_label, CustomerBillingProfile, NewPaymentMethod, PaymentMethodReference,
};
pub use booking::{
    Booking, BookingLineItem, BookingStatus, LineItemKind, NewBooking, ServiceType,
};
pub use booking_status_history::{
    current_status, BookingStatusHistory, NewStatusHistory, EXTENDED_EVENT,
};
pub use driver::{hash_driver_token, DriverAccessToken};
pub use extension_request::{ExtensionRequest, ExtensionStatus};
pub use invoice::{Invoice, InvoiceCategory, InvoiceStatus};
pub use quote::{Quote, QuoteLineItem, QuoteStatus};
pub use settlement_discrepancy::{DiscrepancyStatus, NewDiscrepancy, SettlementDiscrepancy};
