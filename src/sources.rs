//! Locally stored source documents: DOI detection, directory matching and URL fetching.

pub mod doi;
pub mod fetch;
pub mod scan;

pub use doi::{find_doi_in_text, normalize_doi};
pub use scan::{scan_papers_directory, FirstPageText, Pdftotext, ScanResult};
