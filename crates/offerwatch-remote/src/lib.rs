pub mod api;
pub mod description_fetcher;
pub mod error;
pub mod offer_fetcher;
pub mod parser;
pub mod transport;

pub mod test_support;

pub use api::{ApiClient, Credentials, Endpoints};
pub use description_fetcher::BatchDescriptionFetcher;
pub use error::{RemoteError, TransportError};
pub use offer_fetcher::{OfferFetcher, OfferListing, OfferQuery};
pub use parser::{MarkupParser, UnconfiguredMarkupParser};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, Transport};
