//! Collects everything mounted on a host into one routing table.
//!
//! Contributors are walked in a fixed order and every ingress path is
//! claimed exactly once; the second claim of a path fails the whole
//! aggregation, so nothing is applied for a colliding configuration.

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;

use crate::{
    crd::{Backend, Function, Host, PackageReference, PageBinding, PipelineStage, ScriptDefinition},
    error::{Error, Result},
    resolver::{Referent, ThemeAssets},
};

pub const HEALTH_PATH: &str = "/_/health";
pub const OPENAPI_PATH: &str = "/_/openapi";
pub const AUTH_CALLBACK_PATH: &str = "/_/auth/callback";
pub const AUTH_LOGOUT_PATH: &str = "/_/auth/logout";
pub const PACKAGES_PATH: &str = "/_/packages";

/// Name of the host's own inline backend.
pub const MAIN_BACKEND: &str = "main";
pub const PACKAGES_BACKEND: &str = "packages";

/// A backend together with the resource that contributed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBackend {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub backend: Backend,
}

impl ResolvedBackend {
    /// Name of the Deployment and Service synthesized for this backend.
    pub fn child_name(&self, host: &str) -> String {
        format!("{host}-{}", self.name)
    }
}

/// A function mounted on the host. Functions run on the FaaS platform, so
/// they get a route but no workload.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRoute {
    pub name: String,
    pub path: String,
    pub url: Option<String>,
    pub ready: bool,
}

/// Resolved siblings of a host, in the shape [`aggregate`] walks them.
#[derive(Debug, Clone, Default)]
pub struct Siblings {
    pub theme: Option<Referent>,
    pub theme_library: Option<Referent>,
    pub library: Option<Referent>,
    pub pages: Vec<PageBinding>,
    pub required: Vec<Referent>,
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub backends: Vec<ResolvedBackend>,
    pub package_refs: Vec<PackageReference>,
    pub scripts: Vec<ScriptDefinition>,
    pub theme_assets: Option<ThemeAssets>,
    /// Page paths the host renders itself.
    pub initial_paths: Vec<String>,
    pub functions: Vec<FunctionRoute>,
    /// Every claimed path and its owner, `"Kind/name"`.
    pub paths: BTreeMap<String, String>,
}

/// Canonical form of an ingress path: leading slash, no empty segments,
/// no trailing slash except for the root.
pub fn normalize_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(Error::InvalidSpec(format!(
            "ingress path {path:?} must start with '/'"
        )));
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    Ok(format!("/{}", segments.join("/")))
}

struct Walk {
    seen_backends: BTreeSet<(String, String)>,
    seen_packages: BTreeSet<(String, String)>,
    seen_scripts: BTreeSet<String>,
    out: Aggregation,
}

impl Walk {
    fn claim(&mut self, path: &str, owner: String) -> Result<String> {
        let path = normalize_path(path)?;
        if let Some(first) = self.out.paths.get(&path) {
            return Err(Error::PathCollision {
                path,
                first: first.clone(),
                second: owner,
            });
        }
        self.out.paths.insert(path.clone(), owner);
        Ok(path)
    }

    /// Whether `(kind, name)` is new; later duplicates are dropped.
    fn first_sighting(&mut self, kind: &str, name: &str) -> bool {
        self.seen_backends.insert((kind.into(), name.into()))
    }

    fn backend(&mut self, kind: &str, name: &str, namespace: Option<String>, backend: &Backend) -> Result<()> {
        let path = self.claim(&backend.ingress_path, format!("{kind}/{name}"))?;
        let mut backend = backend.clone();
        backend.ingress_path = path;
        self.out.backends.push(ResolvedBackend {
            kind: kind.into(),
            name: name.into(),
            namespace,
            backend,
        });
        Ok(())
    }

    fn packages(&mut self, references: &[PackageReference]) {
        for reference in references {
            if self
                .seen_packages
                .insert((reference.name.clone(), reference.version.clone()))
            {
                self.out.package_refs.push(reference.clone());
            }
        }
    }

    fn scripts(&mut self, scripts: &[ScriptDefinition]) {
        for script in scripts {
            if self.seen_scripts.insert(script.name.clone()) {
                self.out.scripts.push(script.clone());
            }
        }
    }

    fn referent(&mut self, referent: &Referent) -> Result<()> {
        let kind = referent.kind();
        let name = referent.name();
        if !self.first_sighting(kind.as_str(), &name) {
            return Ok(());
        }
        if let Some(backend) = referent.backend() {
            self.backend(kind.as_str(), &name, referent.namespace(), backend)?;
        }
        self.packages(referent.package_references());
        self.scripts(referent.scripts());
        Ok(())
    }

    fn page(&mut self, binding: &PageBinding) -> Result<()> {
        let name = binding.name_any();
        if !self.first_sighting("PageBinding", &name) {
            return Ok(());
        }
        match &binding.spec.backend {
            Some(backend) => {
                // the binding's path wins over whatever the backend declares
                let mut backend = backend.clone();
                backend.ingress_path = binding.spec.path.clone();
                self.backend("PageBinding", &name, binding.namespace(), &backend)
            }
            None => {
                let path = self.claim(&binding.spec.path, format!("PageBinding/{name}"))?;
                self.out.initial_paths.push(path);
                Ok(())
            }
        }
    }

    fn function(&mut self, function: &Function) -> Result<()> {
        let name = function.name_any();
        if !self.first_sighting("Function", &name) {
            return Ok(());
        }
        let path = self.claim(&function.spec.ingress_path, format!("Function/{name}"))?;
        let status = function.status.as_ref();
        self.out.functions.push(FunctionRoute {
            name,
            path,
            url: status.and_then(|s| s.url.clone()),
            ready: status.is_some_and(|s| s.state == PipelineStage::Ready),
        });
        Ok(())
    }
}

/// Walks theme, theme library, host library, utility pages, the host's own
/// backend, page bindings, required references and functions, in that
/// order.
pub fn aggregate(host: &Host, siblings: &Siblings) -> Result<Aggregation> {
    let host_name = host.name_any();
    let mut walk = Walk {
        seen_backends: BTreeSet::new(),
        seen_packages: BTreeSet::new(),
        seen_scripts: BTreeSet::new(),
        out: Aggregation::default(),
    };

    if let Some(theme) = &siblings.theme {
        walk.referent(theme)?;
        walk.out.theme_assets = theme.theme_assets();
    }
    if let Some(library) = &siblings.theme_library {
        walk.referent(library)?;
    }
    if let Some(library) = &siblings.library {
        walk.referent(library)?;
    }

    if host.spec.utility_pages {
        let owner = format!("Host/{host_name}");
        walk.claim(HEALTH_PATH, owner.clone())?;
        walk.claim(OPENAPI_PATH, owner.clone())?;
        if host.spec.auth.is_some() {
            walk.claim(AUTH_CALLBACK_PATH, owner.clone())?;
            walk.claim(AUTH_LOGOUT_PATH, owner)?;
        }
    }

    if let Some(backend) = &host.spec.backend {
        walk.first_sighting("Host", MAIN_BACKEND);
        walk.backend("Host", MAIN_BACKEND, host.namespace(), backend)?;
    }
    walk.packages(&host.spec.package_references);

    let mut pages: Vec<&PageBinding> = siblings.pages.iter().collect();
    pages.sort_by_key(|p| p.name_any());
    for page in pages {
        walk.page(page)?;
    }

    for referent in &siblings.required {
        walk.referent(referent)?;
    }

    let mut functions: Vec<&Function> = siblings.functions.iter().collect();
    functions.sort_by_key(|f| f.name_any());
    for function in functions {
        walk.function(function)?;
    }

    if !walk.out.package_refs.is_empty() {
        walk.claim(PACKAGES_PATH, format!("PackageReferences/{host_name}-{PACKAGES_BACKEND}"))?;
    }
    Ok(walk.out)
}
