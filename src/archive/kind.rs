//! Suffix-based archive kind detection.

/// Closed set of recognized archive formats. Detection is purely by filename
/// suffix; multi-part suffixes are checked before single ones so a `.tar.gz`
/// is never misread as plain `.gz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    SevenZ,
    Rar,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    Gz,
    Bz2,
    Xz,
}

/// Ordered longest-match-first: multi-part suffixes precede their tails.
const SUFFIXES: &[(&str, ArchiveKind)] = &[
    (".tar.gz", ArchiveKind::TarGz),
    (".tgz", ArchiveKind::TarGz),
    (".tar.bz2", ArchiveKind::TarBz2),
    (".tbz2", ArchiveKind::TarBz2),
    (".tar.xz", ArchiveKind::TarXz),
    (".txz", ArchiveKind::TarXz),
    (".tar", ArchiveKind::Tar),
    (".zip", ArchiveKind::Zip),
    (".7z", ArchiveKind::SevenZ),
    (".rar", ArchiveKind::Rar),
    (".gz", ArchiveKind::Gz),
    (".bz2", ArchiveKind::Bz2),
    (".xz", ArchiveKind::Xz),
];

impl ArchiveKind {
    /// Detects the kind from a bare filename, `None` for unknown suffixes.
    pub fn from_name(name: &str) -> Option<ArchiveKind> {
        let lower = name.to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| lower.ends_with(suffix) && lower.len() > suffix.len())
            .map(|(_, kind)| *kind)
    }

    pub fn is_tar_family(self) -> bool {
        matches!(
            self,
            ArchiveKind::Tar | ArchiveKind::TarGz | ArchiveKind::TarBz2 | ArchiveKind::TarXz
        )
    }

    /// Single-stream compressed files that decompress to exactly one file.
    pub fn is_single_stream(self) -> bool {
        matches!(self, ArchiveKind::Gz | ArchiveKind::Bz2 | ArchiveKind::Xz)
    }
}

/// Splits a filename into `(stem, kind)`, stripping the longest matching
/// known suffix. `None` when the name carries no recognized suffix.
pub fn split_stem(name: &str) -> Option<(&str, ArchiveKind)> {
    let lower = name.to_ascii_lowercase();
    for (suffix, kind) in SUFFIXES {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            return Some((&name[..name.len() - suffix.len()], *kind));
        }
    }
    None
}
