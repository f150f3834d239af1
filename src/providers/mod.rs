pub mod datacite;
