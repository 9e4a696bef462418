use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{Warning, WarningKind};
use crate::models::AssetMap;
use crate::pages::{dependencies_for, page_stem};
use crate::registry::resolve_hashed_name;

/// Public URL prefixes used for manifest entries. Both end with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPrefixes {
    /// Prefix for CSS, JS and image entries.
    pub assets: String,
    /// Prefix for SHTML entries.
    pub shtml: String,
}

impl ManifestPrefixes {
    /// Prefixes for `module` from the target's `assetPrefix`/`shtmlPrefix`, falling back to the
    /// rewrite prefix when a value is not configured.
    pub fn new(
        module: &str,
        asset_prefix: Option<&str>,
        shtml_prefix: Option<&str>,
        fallback: String,
    ) -> Self {
        let qualify = |prefix: Option<&str>| {
            prefix
                .map(str::trim)
                .filter(|prefix| !prefix.is_empty())
                .map(|prefix| format!("{}/{module}/", prefix.trim_end_matches('/')))
        };

        let assets = qualify(asset_prefix).unwrap_or(fallback);
        let shtml = qualify(shtml_prefix).unwrap_or_else(|| assets.clone());
        Self { assets, shtml }
    }
}

/// Files and manifest entries of one page-mode publish run.
///
/// Globs and manifest entries are deduplicated keeping their first occurrence, so the plan is
/// stable for identical inputs.
#[derive(Debug, Clone, Default)]
pub struct PublishPlan {
    pages: Vec<String>,
    raw_globs: Vec<String>,
    manifest: Vec<String>,
    seen_globs: BTreeSet<String>,
    seen_manifest: BTreeSet<String>,
}

impl PublishPlan {
    /// Plan the raw file set and manifest for `pages` of `module`.
    ///
    /// `images` are the file names found in the module's image directory, sorted.
    pub fn for_pages(
        module: &str,
        pages: &[String],
        map: &AssetMap,
        images_dir: &str,
        images: &[String],
        prefixes: &ManifestPrefixes,
        warnings: &mut Vec<Warning>,
    ) -> Self {
        let mut plan = Self::default();

        for page in pages {
            plan.pages.push(page.clone());

            match dependencies_for(page, &map.include) {
                Some(include) => {
                    for css in include.css_owned_by(module) {
                        plan.add_stylesheet(css.stem("css"), map, prefixes);
                    }
                    for js in include.js_owned_by(module) {
                        plan.add_script(js.stem("js"), map, prefixes);
                    }
                    let foreign = include.css.len() + include.js.len()
                        - include.css_owned_by(module).count()
                        - include.js_owned_by(module).count();
                    if foreign > 0 {
                        debug!(page, foreign, "skipping dependencies owned by other modules");
                    }
                }
                None => warnings.push(
                    Warning::new(
                        WarningKind::MissingInclude,
                        module,
                        "page has no include entry; only images are published",
                    )
                    .in_file(page),
                ),
            }

            plan.add_glob(format!("{images_dir}/*"));
            plan.add_manifest(format!("{}{}.shtml", prefixes.shtml, page_stem(page)));
            for image in images {
                plan.add_manifest(format!("{}{images_dir}/{image}", prefixes.assets));
            }
        }

        plan
    }

    fn add_stylesheet(&mut self, stem: &str, map: &AssetMap, prefixes: &ManifestPrefixes) {
        let logical = format!("css/{stem}.css");
        let minified = format!("css/{stem}.min.css");
        let hashed = resolve_hashed_name(&logical, map).to_string();
        let hashed_minified = resolve_hashed_name(&minified, map).to_string();

        self.add_glob(format!("css/{stem}.*"));
        for path in [&logical, &hashed, &minified, &hashed_minified] {
            self.add_glob(path.clone());
        }
        for path in [&logical, &minified, &hashed, &hashed_minified] {
            self.add_manifest(format!("{}{path}", prefixes.assets));
        }
    }

    fn add_script(&mut self, stem: &str, map: &AssetMap, prefixes: &ManifestPrefixes) {
        let logical = format!("js/{stem}.js");
        let hashed = resolve_hashed_name(&logical, map).to_string();

        self.add_glob(format!("js/{stem}.*"));
        self.add_glob(logical.clone());
        self.add_glob(hashed.clone());
        self.add_manifest(format!("{}{logical}", prefixes.assets));
        self.add_manifest(format!("{}{hashed}", prefixes.assets));
    }

    fn add_glob(&mut self, glob: String) {
        if self.seen_globs.insert(glob.clone()) {
            self.raw_globs.push(glob);
        }
    }

    fn add_manifest(&mut self, entry: String) {
        if self.seen_manifest.insert(entry.clone()) {
            self.manifest.push(entry);
        }
    }

    /// Selected pages in request order.
    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    /// Globs selecting the raw file set, relative to the output directory.
    pub fn raw_globs(&self) -> &[String] {
        &self.raw_globs
    }

    /// Planned manifest entries.
    pub fn manifest(&self) -> &[String] {
        &self.manifest
    }
}
