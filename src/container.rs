use crate::error::ContainerError;
use flate2::read::MultiGzDecoder;
use std::io::{self, prelude::*, Cursor, SeekFrom};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 2] = [0x50, 0x4b];

/// How a report file is packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFileType {
	Gzip,
	Zip,
	Raw,
}

/// Peeks at the leading bytes of the stream to find out how the report is packed.
///
/// The stream is always put back where it was, so the caller can hand it on untouched.
/// Anything without a known magic number is bare XML.
pub fn sniff<R: Read + Seek>(stream: &mut R) -> io::Result<ReportFileType> {
	let start = stream.stream_position()?;

	let mut magic = [0u8; 2];
	let peeked = read_up_to(stream, &mut magic);
	stream.seek(SeekFrom::Start(start))?;

	Ok(match &magic[..peeked?] {
		m if m == GZIP_MAGIC => ReportFileType::Gzip,
		m if m == ZIP_MAGIC => ReportFileType::Zip,
		_ => ReportFileType::Raw,
	})
}

fn read_up_to<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
	let mut filled = 0;
	while filled < buf.len() {
		match stream.read(&mut buf[filled..]) {
			Ok(0) => break,
			Ok(n) => filled += n,
			Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(e),
		}
	}
	Ok(filled)
}

/// A report stream with its compression peeled off.
pub enum Decompressed<R> {
	Gzip(MultiGzDecoder<R>),
	Zip(Cursor<Vec<u8>>),
	Raw(R),
}

impl<R: Read> Read for Decompressed<R> {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		match self {
			Self::Gzip(d) => d.read(buf),
			Self::Zip(c) => c.read(buf),
			Self::Raw(r) => r.read(buf),
		}
	}
}

/// Wraps the stream in the reader matching `report_type`.
///
/// Zip archives are expected to hold a single report. Only the first entry in
/// directory order is read; any others are ignored with a warning.
pub fn decompress<R: Read + Seek>(
	stream: R,
	report_type: ReportFileType,
) -> Result<Decompressed<R>, ContainerError> {
	match report_type {
		ReportFileType::Gzip => Ok(Decompressed::Gzip(MultiGzDecoder::new(stream))),
		ReportFileType::Zip => {
			let mut archive = zip::ZipArchive::new(stream)?;

			if archive.is_empty() {
				return Err(ContainerError::EmptyArchive);
			}
			if archive.len() > 1 {
				tracing::warn!(
					entries = archive.len(),
					"zip archive holds several files, only the first one is read"
				);
			}

			let mut report_file = archive.by_index(0)?;
			tracing::debug!(name = report_file.name(), "reading report from zip archive");

			let mut data = Vec::with_capacity(report_file.size() as usize);
			report_file
				.read_to_end(&mut data)
				.map_err(zip::result::ZipError::from)?;
			Ok(Decompressed::Zip(Cursor::new(data)))
		}
		ReportFileType::Raw => Ok(Decompressed::Raw(stream)),
	}
}

/// Sniffs, decompresses and reads the whole report into memory.
pub fn read_report<R: Read + Seek>(mut stream: R) -> Result<Vec<u8>, ContainerError> {
	let report_type = sniff(&mut stream)?;
	tracing::debug!(?report_type, "sniffed report container");

	let mut reader = decompress(stream, report_type)?;
	let mut data = Vec::new();
	reader.read_to_end(&mut data).map_err(|e| match report_type {
		ReportFileType::Gzip => ContainerError::Gzip(e),
		_ => ContainerError::Io(e),
	})?;
	Ok(data)
}

#[cfg(test)]
mod tests {
	use super::*;
	use flate2::{write::GzEncoder, Compression};
	use pretty_assertions::assert_eq;
	use zip::write::FileOptions;

	const XML: &[u8] = b"<?xml version=\"1.0\"?><feedback></feedback>";

	fn gzip(data: &[u8]) -> Vec<u8> {
		let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
		encoder.write_all(data).unwrap();
		encoder.finish().unwrap()
	}

	fn zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
		let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
		for (name, data) in entries {
			writer.start_file(*name, FileOptions::default()).unwrap();
			writer.write_all(data).unwrap();
		}
		writer.finish().unwrap().into_inner()
	}

	#[test]
	fn sniff_rewinds_to_original_position() {
		let mut data = b"xx".to_vec();
		data.extend(gzip(XML));
		let mut stream = Cursor::new(data);
		stream.seek(SeekFrom::Start(2)).unwrap();

		assert_eq!(sniff(&mut stream).unwrap(), ReportFileType::Gzip);
		assert_eq!(stream.position(), 2);
	}

	#[test]
	fn sniff_classifies() {
		assert_eq!(sniff(&mut Cursor::new(gzip(XML))).unwrap(), ReportFileType::Gzip);
		assert_eq!(
			sniff(&mut Cursor::new(zip(&[("a.xml", XML)]))).unwrap(),
			ReportFileType::Zip
		);
		assert_eq!(sniff(&mut Cursor::new(XML)).unwrap(), ReportFileType::Raw);
		assert_eq!(sniff(&mut Cursor::new(b"<")).unwrap(), ReportFileType::Raw);
		assert_eq!(sniff(&mut Cursor::new(b"")).unwrap(), ReportFileType::Raw);
	}

	#[test]
	fn read_all_containers() {
		assert_eq!(read_report(Cursor::new(gzip(XML))).unwrap(), XML);
		assert_eq!(read_report(Cursor::new(zip(&[("a.xml", XML)]))).unwrap(), XML);
		assert_eq!(read_report(Cursor::new(XML)).unwrap(), XML);
	}

	#[test]
	fn zip_reads_first_entry_only() {
		let archive = zip(&[("first.xml", XML), ("second.xml", b"<other/>")]);
		assert_eq!(read_report(Cursor::new(archive)).unwrap(), XML);
	}

	#[test]
	fn empty_zip_is_an_error() {
		let archive = zip(&[]);
		assert!(matches!(
			read_report(Cursor::new(archive)),
			Err(ContainerError::EmptyArchive)
		));
	}

	#[test]
	fn gzip_reads_every_member() {
		let (head, tail) = XML.split_at(XML.len() / 2);
		let mut data = gzip(head);
		data.extend(gzip(tail));

		assert_eq!(read_report(Cursor::new(data)).unwrap(), XML);
	}

	#[test]
	fn corrupt_gzip() {
		let mut data = gzip(XML);
		data.truncate(data.len() / 2);
		assert!(matches!(
			read_report(Cursor::new(data)),
			Err(ContainerError::Gzip(_))
		));
	}

	#[test]
	fn corrupt_zip() {
		let data = b"PK\x03\x04 definitely not a zip archive".to_vec();
		assert!(matches!(
			read_report(Cursor::new(data)),
			Err(ContainerError::Zip(_))
		));
	}
}
