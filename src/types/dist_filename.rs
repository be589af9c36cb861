use super::{NormalizedPackageName, PackageName, ParsePackageNameError};
use pep440_rs::Version;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// The parsed filename of a distribution file, either a binary wheel or a
/// source distribution. Everything that can be read off the filename alone
/// (name, version, wheel tags, archive format) lives here.
#[derive(Debug, Clone, PartialOrd, Ord, Eq, PartialEq)]
pub enum DistFilename {
    /// A binary wheel (PEP 427 filename convention).
    Wheel(WheelFilename),
    /// A source distribution.
    SDist(SDistFilename),
}

impl DistFilename {
    /// Parses a distribution filename. The normalized package name is needed
    /// to find the boundary between the distribution and version components,
    /// since both may contain dashes.
    pub fn from_filename(
        input: &str,
        package: &NormalizedPackageName,
    ) -> Result<Self, ParseDistFilenameError> {
        if input.ends_with(".whl") {
            Ok(DistFilename::Wheel(WheelFilename::from_filename(
                input, package,
            )?))
        } else {
            Ok(DistFilename::SDist(SDistFilename::from_filename(
                input, package,
            )?))
        }
    }

    /// Returns the version encoded in the filename.
    pub fn version(&self) -> &Version {
        match self {
            DistFilename::Wheel(name) => &name.version,
            DistFilename::SDist(name) => &name.version,
        }
    }

    /// Returns the distribution name encoded in the filename.
    pub fn distribution(&self) -> &PackageName {
        match self {
            DistFilename::Wheel(name) => &name.distribution,
            DistFilename::SDist(name) => &name.distribution,
        }
    }

    /// True for wheels.
    pub fn is_wheel(&self) -> bool {
        matches!(self, DistFilename::Wheel(_))
    }

    /// Returns the wheel filename, if this is a wheel.
    pub fn as_wheel(&self) -> Option<&WheelFilename> {
        match self {
            DistFilename::Wheel(wheel) => Some(wheel),
            DistFilename::SDist(_) => None,
        }
    }

    /// Returns the sdist filename, if this is a source distribution.
    pub fn as_sdist(&self) -> Option<&SDistFilename> {
        match self {
            DistFilename::Wheel(_) => None,
            DistFilename::SDist(sdist) => Some(sdist),
        }
    }
}

impl Display for DistFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DistFilename::Wheel(name) => write!(f, "{}", name),
            DistFilename::SDist(name) => write!(f, "{}", name),
        }
    }
}

/// The components of a wheel filename, see the
/// [file name convention](https://www.python.org/dev/peps/pep-0427/#file-name-convention).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WheelFilename {
    /// Distribution name, e.g. `django`.
    pub distribution: PackageName,

    /// Distribution version, e.g. `1.0`.
    pub version: Version,

    /// Optional build tag, acts as a tie breaker between otherwise identical
    /// wheels.
    pub build_tag: Option<String>,

    /// Interpreter tags, e.g. `py3`, `cp311`.
    pub py_tags: Vec<String>,

    /// ABI tags, e.g. `abi3`, `none`.
    pub abi_tags: Vec<String>,

    /// Platform tags, e.g. `any`, `manylinux_2_17_x86_64`.
    pub arch_tags: Vec<String>,
}

impl WheelFilename {
    /// True when the wheel is platform independent (its only platform tag is
    /// `any`).
    pub fn is_any_platform(&self) -> bool {
        self.arch_tags.iter().all(|tag| tag == "any")
    }

    /// Parses a wheel filename, e.g. `trio-0.18.0-py3-none-any.whl`.
    pub fn from_filename(
        input: &str,
        package: &NormalizedPackageName,
    ) -> Result<Self, ParseDistFilenameError> {
        let Some(stem) = input.strip_suffix(".whl") else {
            return Err(ParseDistFilenameError::InvalidExtension(input.to_string()));
        };

        let Some((distribution, rest)) = split_off_package_name(stem, package) else {
            return Err(ParseDistFilenameError::PackageNameNotFound(
                package.clone(),
                input.to_string(),
            ));
        };
        let distribution = PackageName::from_str(distribution)?;

        let Some((version, rest)) = rest.split_once('-') else {
            return Err(ParseDistFilenameError::InvalidName(input.to_string()));
        };
        let version = Version::from_str(version)
            .map_err(|e| ParseDistFilenameError::InvalidVersion(e.to_string()))?;

        let Some((rest, platform_tags)) = rest.rsplit_once('-') else {
            return Err(ParseDistFilenameError::InvalidName(input.to_string()));
        };
        let arch_tags = platform_tags.split('.').map(ToOwned::to_owned).collect();

        let Some((rest, abi_tag)) = rest.rsplit_once('-') else {
            return Err(ParseDistFilenameError::InvalidName(input.to_string()));
        };
        let abi_tags = abi_tag.split('.').map(ToOwned::to_owned).collect();

        // An optional build tag sits between the version and the python tag.
        let (build_tag, python_tag) = match rest.rsplit_once('-') {
            Some((build_tag, python_tag)) => (Some(build_tag), python_tag),
            None => (None, rest),
        };
        if let Some(build_tag) = build_tag {
            if !build_tag.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(ParseDistFilenameError::InvalidBuildTag(
                    build_tag.to_string(),
                ));
            }
        }
        let py_tags = python_tag.split('.').map(ToOwned::to_owned).collect();

        Ok(Self {
            distribution,
            version,
            build_tag: build_tag.map(ToOwned::to_owned),
            py_tags,
            abi_tags,
            arch_tags,
        })
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{dist}-{ver}{build}-{py}-{abi}-{arch}.whl",
            dist = self.distribution.as_source_str(),
            ver = self.version,
            build = self
                .build_tag
                .as_ref()
                .map_or_else(String::new, |tag| format!("-{tag}")),
            py = self.py_tags.join("."),
            abi = self.abi_tags.join("."),
            arch = self.arch_tags.join("."),
        )
    }
}

/// The components of a source distribution filename.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SDistFilename {
    /// Distribution name, e.g. `django`.
    pub distribution: PackageName,

    /// Distribution version, e.g. `1.0`.
    pub version: Version,

    /// The archive format the file is shipped in.
    pub format: SDistFormat,
}

impl SDistFilename {
    /// Parses a source distribution filename, e.g. `trio-0.18.0.tar.gz`.
    pub fn from_filename(
        input: &str,
        package: &NormalizedPackageName,
    ) -> Result<Self, ParseDistFilenameError> {
        let (package_name, rest) = split_off_package_name(input, package).ok_or_else(|| {
            ParseDistFilenameError::PackageNameNotFound(package.clone(), input.to_string())
        })?;

        let (version, format) = SDistFormat::strip_extension(rest)
            .ok_or_else(|| ParseDistFilenameError::InvalidExtension(input.to_string()))?;

        Ok(SDistFilename {
            distribution: PackageName::from_str(package_name)?,
            version: Version::from_str(version)
                .map_err(|e| ParseDistFilenameError::InvalidVersion(e.to_string()))?,
            format,
        })
    }
}

impl Display for SDistFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{dist}-{ver}{format}",
            dist = self.distribution.as_source_str(),
            ver = self.version,
            format = self.format,
        )
    }
}

/// The archive format of a source distribution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum SDistFormat {
    Zip,
    TarGz,
    TarBz2,
    TarXz,
    Tar,
}

impl SDistFormat {
    /// Returns whether this archive format can be unpacked for building.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::TarGz | Self::Tar | Self::Zip)
    }

    /// Splits a known sdist extension off `input`, returning the remainder
    /// and the detected format.
    fn strip_extension(input: &str) -> Option<(&str, SDistFormat)> {
        const EXTENSIONS: &[(&str, SDistFormat)] = &[
            (".zip", SDistFormat::Zip),
            (".tar.gz", SDistFormat::TarGz),
            (".tar.bz2", SDistFormat::TarBz2),
            (".tar.xz", SDistFormat::TarXz),
            (".tar", SDistFormat::Tar),
        ];
        EXTENSIONS
            .iter()
            .find_map(|(ext, format)| input.strip_suffix(ext).map(|rest| (rest, *format)))
    }
}

impl Display for SDistFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let format = match self {
            SDistFormat::Zip => ".zip",
            SDistFormat::TarGz => ".tar.gz",
            SDistFormat::TarBz2 => ".tar.bz2",
            SDistFormat::TarXz => ".tar.xz",
            SDistFormat::Tar => ".tar",
        };
        write!(f, "{format}")
    }
}

/// An error that can occur when parsing a distribution filename.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum ParseDistFilenameError {
    #[error("invalid distribution filename '{0}'")]
    InvalidName(String),

    #[error("package name '{0}' not found in filename '{1}'")]
    PackageNameNotFound(NormalizedPackageName, String),

    #[error("unrecognized distribution file extension (filename='{0}')")]
    InvalidExtension(String),

    #[error(transparent)]
    InvalidPackageName(#[from] ParsePackageNameError),

    #[error("invalid version: '{0}'")]
    InvalidVersion(String),

    #[error("build tag '{0}' must start with a digit")]
    InvalidBuildTag(String),
}

/// Finds the dash that separates the package name from the rest of the
/// filename by normalizing successively longer prefixes until one matches the
/// expected package. Needed because both the name and the version may contain
/// dashes, e.g. `zope-interface-6.1.tar.gz`.
fn split_off_package_name<'a>(
    input: &'a str,
    package: &NormalizedPackageName,
) -> Option<(&'a str, &'a str)> {
    for (idx, char) in input.char_indices() {
        if char == '-' {
            let (name, rest) = (&input[..idx], &input[idx + 1..]);
            if let Ok(parsed) = name.parse::<NormalizedPackageName>() {
                if parsed == *package {
                    return Some((name, rest));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wheel_roundtrip() {
        let name =
            WheelFilename::from_filename("trio-0.18.0-py3-none-any.whl", &"trio".parse().unwrap())
                .unwrap();
        assert_eq!(name.distribution, "trio".parse().unwrap());
        assert_eq!(name.version, "0.18.0".parse().unwrap());
        assert_eq!(name.build_tag, None);
        assert_eq!(name.py_tags, vec!["py3"]);
        assert_eq!(name.abi_tags, vec!["none"]);
        assert!(name.is_any_platform());
        assert_eq!(name.to_string(), "trio-0.18.0-py3-none-any.whl");
    }

    #[test]
    fn wheel_with_build_tag_and_multiple_tags() {
        let name = WheelFilename::from_filename(
            "foo.bar-0.1b3-1local-py2.py3-none-any.whl",
            &"foo.bar".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(name.build_tag.as_deref(), Some("1local"));
        assert_eq!(name.py_tags, vec!["py2", "py3"]);
        assert_eq!(name.to_string(), "foo.bar-0.1b3-1local-py2.py3-none-any.whl");
    }

    #[test]
    fn platform_specific_wheel() {
        let name = WheelFilename::from_filename(
            "numpy-1.26.0-pp39-pypy39_pp73-manylinux_2_17_x86_64.manylinux2014_x86_64.whl",
            &"numpy".parse().unwrap(),
        )
        .unwrap();
        assert!(!name.is_any_platform());
        assert_eq!(
            name.arch_tags,
            vec!["manylinux_2_17_x86_64", "manylinux2014_x86_64"]
        );
    }

    #[test]
    fn sdist_with_dashed_name() {
        let name = SDistFilename::from_filename(
            "zope-interface-6.1.tar.gz",
            &"zope-interface".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(name.distribution, "zope-interface".parse().unwrap());
        assert_eq!(name.version, "6.1".parse().unwrap());
        assert_eq!(name.format, SDistFormat::TarGz);
        assert_eq!(name.to_string(), "zope-interface-6.1.tar.gz");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            DistFilename::from_filename("trio-0.18.0.rpm", &"trio".parse().unwrap()),
            Err(ParseDistFilenameError::InvalidExtension(_))
        ));
    }
}
