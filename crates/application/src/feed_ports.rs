mod page;
mod transport;

pub use page::{ActivityFilters, ActivityPage, ActivityPageQuery};
pub use transport::{ActivityTransport, DeliverySink, LiveDelivery, LiveSubscription};
