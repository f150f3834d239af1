/// Base endpoint for DOI queries against the DataCite REST API
pub const DATACITE_DOIS_URL: &str = "https://api.datacite.org/dois";

/// URL prefix of full-form ROR identifiers
pub const ROR_PREFIX: &str = "https://ror.org/";

/// Records per page when walking the full result set
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// User-Agent sent with every request so the registry can identify the harvester
pub const USER_AGENT: &str = concat!("ro-harvester/", env!("CARGO_PKG_VERSION"));
