pub mod dicom;

pub use dicom::{DicomIdentifier, InstanceKeys};
