pub mod billing_profile_service;
pub mod booking_lifecycle;
pub mod booking_materializer;
pub mod invoice_resolver;
pub mod payment_authorizer;
pub mod reconciliation_service;
pub mod settlement_coordinator;
pub mod side_effects;

pub use billing_profile_service::BillingProfileService;
pub use booking_lifecycle::{BookingLifecycleService, BookingStateMachine};
pub use booking_materializer::{generate_booking_number, BookingMaterializer, MaterializedBooking};
pub use invoice_resolver::{InvoiceResolver, ResolvedInvoice};
pub use payment_authorizer::{to_minor_units, AuthorizationOutcome, ChargeRequest, PaymentAuthorizer};
pub use reconciliation_service::{ReconciliationReport, ReconciliationScheduler, ReconciliationService};
pub use settlement_coordinator::{
    PaymentMethodChoice, PendingCommit, SettlementCoordinator, SettlementOutcome,
    SettlementReceipt, SettlementRequest,
};
pub use side_effects::{SideEffectDispatcher, SideEffectOutcome};
