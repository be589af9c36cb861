use crate::types::NormalizedPackageName;
use pep440_rs::Version;
use url::Url;

/// The URL layout of a PyPI-compatible registry: where file listings, release
/// documents and separately served metadata files live, relative to a single
/// base URL (e.g. `https://pypi.org/`).
#[derive(Debug, Clone)]
pub struct PackageSources {
    base: Url,
}

impl PackageSources {
    /// Creates a registry layout rooted at `base`.
    pub fn new(base: Url) -> Self {
        Self {
            base: normalize_index_url(base),
        }
    }

    /// The base URL of the registry.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// The simple-index listing of a project: `{base}/simple/{name}/`.
    pub fn simple_project_url(&self, name: &NormalizedPackageName) -> Url {
        self.base
            .join(&format!("simple/{}/", name.as_str()))
            .expect("package names are valid url path segments")
    }

    /// The per-release JSON document: `{base}/pypi/{name}/{version}/json`.
    pub fn release_document_url(&self, name: &NormalizedPackageName, version: &Version) -> Url {
        self.base
            .join(&format!("pypi/{}/{}/json", name.as_str(), version))
            .expect("package names and versions are valid url path segments")
    }

    /// The separately served core metadata of a file (PEP 658): the file URL
    /// with `.metadata` appended.
    pub fn file_metadata_url(file_url: &Url) -> Url {
        let mut url = file_url.clone();
        url.set_path(&format!("{}.metadata", url.path()));
        url
    }
}

impl From<Url> for PackageSources {
    fn from(url: Url) -> Self {
        Self::new(url)
    }
}

/// Ensures the URL ends in a slash so that joining relative paths appends
/// instead of replacing the last segment.
fn normalize_index_url(mut url: Url) -> Url {
    let path = url.path();
    if !path.ends_with('/') {
        url.set_path(&format!("{path}/"));
    }
    url
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn url_layout() {
        let sources = PackageSources::new(Url::parse("https://pypi.org").unwrap());
        let name = NormalizedPackageName::from_str("charset-normalizer").unwrap();

        assert_eq!(
            sources.simple_project_url(&name).as_str(),
            "https://pypi.org/simple/charset-normalizer/"
        );
        assert_eq!(
            sources
                .release_document_url(&name, &"3.3.2".parse().unwrap())
                .as_str(),
            "https://pypi.org/pypi/charset-normalizer/3.3.2/json"
        );

        let file_url =
            Url::parse("https://files.example/charset_normalizer-3.3.2-py3-none-any.whl").unwrap();
        assert_eq!(
            PackageSources::file_metadata_url(&file_url).as_str(),
            "https://files.example/charset_normalizer-3.3.2-py3-none-any.whl.metadata"
        );
    }
}
