//! Best-effort dependency detection and installation.
//!
//! Detection is a regex scan of import statements and build diagnostics, not
//! a real resolver. Whatever it misses shows up as a build error and is left
//! to the repair loop.

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::sandbox::{CommandRunner, FileChannel, RunOptions, SandboxHandle};

static IMPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"import\s+(?:type\s+)?(?:[\w$]+\s*,\s*)?(?:\{([^}]*)\}|\*\s+as\s+[\w$]+|[\w$]+)\s+from\s+["']([^"']+)["']"#,
    )
    .unwrap()
});

static MISSING_MODULE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:Cannot find module|Failed to resolve import|Could not resolve)\s+['"]([^'"]+)['"]"#)
        .unwrap()
});

static PACKAGE_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:@[a-z0-9][a-z0-9._-]*/)?[a-z0-9][a-z0-9._-]*$").unwrap());

const UI_PREFIX: &str = "@/components/ui/";

/// Exported UI symbols and the component that provides them.
const UI_CATALOG: &[(&str, &str)] = &[
    ("Accordion", "accordion"),
    ("Alert", "alert"),
    ("AlertDescription", "alert"),
    ("AlertTitle", "alert"),
    ("Avatar", "avatar"),
    ("AvatarFallback", "avatar"),
    ("AvatarImage", "avatar"),
    ("Badge", "badge"),
    ("Button", "button"),
    ("Calendar", "calendar"),
    ("Card", "card"),
    ("CardContent", "card"),
    ("CardDescription", "card"),
    ("CardFooter", "card"),
    ("CardHeader", "card"),
    ("CardTitle", "card"),
    ("Checkbox", "checkbox"),
    ("Dialog", "dialog"),
    ("DropdownMenu", "dropdown-menu"),
    ("Input", "input"),
    ("Label", "label"),
    ("Popover", "popover"),
    ("Progress", "progress"),
    ("RadioGroup", "radio-group"),
    ("RadioGroupItem", "radio-group"),
    ("ScrollArea", "scroll-area"),
    ("Select", "select"),
    ("SelectContent", "select"),
    ("SelectItem", "select"),
    ("SelectTrigger", "select"),
    ("SelectValue", "select"),
    ("Separator", "separator"),
    ("Sheet", "sheet"),
    ("Skeleton", "skeleton"),
    ("Slider", "slider"),
    ("Switch", "switch"),
    ("Table", "table"),
    ("TableBody", "table"),
    ("TableCell", "table"),
    ("TableHead", "table"),
    ("TableHeader", "table"),
    ("TableRow", "table"),
    ("Tabs", "tabs"),
    ("TabsContent", "tabs"),
    ("TabsList", "tabs"),
    ("TabsTrigger", "tabs"),
    ("Textarea", "textarea"),
    ("Toggle", "toggle"),
    ("Tooltip", "tooltip"),
];

/// npm packages the generator is allowed to import.
const PACKAGE_ALLOWLIST: &[&str] = &[
    "lucide-react",
    "recharts",
    "framer-motion",
    "date-fns",
    "clsx",
    "react-day-picker",
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dependency {
    /// shadcn/ui component id, e.g. `button`.
    UiComponent(String),
    /// npm package name.
    Package(String),
}

impl Dependency {
    pub fn install_command(&self) -> String {
        match self {
            Dependency::UiComponent(id) => {
                format!("npx shadcn@latest add {} --yes --overwrite", id)
            }
            Dependency::Package(name) => format!("npm install {}", name),
        }
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dependency::UiComponent(id) => write!(f, "ui/{}", id),
            Dependency::Package(name) => write!(f, "{}", name),
        }
    }
}

fn catalog_component(symbol: &str) -> Option<&'static str> {
    UI_CATALOG
        .iter()
        .find(|(name, _)| *name == symbol)
        .map(|(_, id)| *id)
}

/// Root package of an import specifier: `@scope/pkg/sub` → `@scope/pkg`.
fn package_root(specifier: &str) -> &str {
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next().unwrap_or(specifier);
    if first.starts_with('@') {
        match parts.next() {
            Some(second) => &specifier[..first.len() + 1 + second.len()],
            None => specifier,
        }
    } else {
        first
    }
}

fn ui_component_id(specifier: &str) -> Option<String> {
    let id = specifier.strip_prefix(UI_PREFIX)?;
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    valid.then(|| id.to_string())
}

/// Dependencies referenced by `import` statements in generated source.
pub fn detect_imports(source: &str) -> Vec<Dependency> {
    let mut found = BTreeSet::new();

    for caps in IMPORT_REGEX.captures_iter(source) {
        let Some(specifier) = caps.get(2).map(|m| m.as_str()) else {
            continue;
        };

        if let Some(id) = ui_component_id(specifier) {
            found.insert(Dependency::UiComponent(id));
            continue;
        }
        if specifier == "@/components/ui" {
            // Barrel import: map each named symbol through the catalog.
            if let Some(names) = caps.get(1) {
                for symbol in names.as_str().split(',') {
                    let symbol = symbol.split_whitespace().next().unwrap_or_default();
                    if let Some(id) = catalog_component(symbol) {
                        found.insert(Dependency::UiComponent(id.to_string()));
                    }
                }
            }
            continue;
        }

        let root = package_root(specifier);
        if PACKAGE_ALLOWLIST.contains(&root) {
            found.insert(Dependency::Package(root.to_string()));
        }
    }

    found.into_iter().collect()
}

/// Dependencies named by "module not found" errors in build output.
pub fn detect_missing(diagnostics: &str) -> Vec<Dependency> {
    let mut found = BTreeSet::new();

    for caps in MISSING_MODULE_REGEX.captures_iter(diagnostics) {
        let specifier = &caps[1];
        if let Some(id) = ui_component_id(specifier) {
            found.insert(Dependency::UiComponent(id));
        } else if !specifier.starts_with('.') && !specifier.starts_with("@/") {
            let root = package_root(specifier);
            if PACKAGE_NAME_REGEX.is_match(root) {
                found.insert(Dependency::Package(root.to_string()));
            }
        }
    }

    found.into_iter().collect()
}

/// Result of [`DependencyResolver::install_all`].
#[derive(Debug, Default)]
pub struct InstallReport {
    pub installed: Vec<Dependency>,
    /// Already present in the sandbox.
    pub skipped: Vec<Dependency>,
    pub failed: Vec<(Dependency, String)>,
}

#[derive(Clone)]
pub struct DependencyResolver {
    runner: CommandRunner,
    files: FileChannel,
    project_dir: String,
    install_timeout: Duration,
}

impl DependencyResolver {
    pub fn new(
        runner: CommandRunner,
        files: FileChannel,
        project_dir: impl Into<String>,
        install_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            files,
            project_dir: project_dir.into(),
            install_timeout,
        }
    }

    /// Install each dependency, one command at a time. Installs share lock
    /// files, so they never run concurrently. Failures are recorded, not
    /// returned: the build will report anything still missing.
    pub async fn install_all(
        &self,
        handle: &SandboxHandle,
        dependencies: &[Dependency],
    ) -> InstallReport {
        let mut report = InstallReport::default();
        let present = self.present_components(handle).await;
        let opts = RunOptions::new(self.project_dir.clone(), self.install_timeout);

        for dep in dependencies {
            if let Dependency::UiComponent(id) = dep
                && present.contains(&format!("{}.tsx", id))
            {
                debug!(sandbox_id = %handle.id, dependency = %dep, "already installed");
                report.skipped.push(dep.clone());
                continue;
            }

            let command = dep.install_command();
            info!(sandbox_id = %handle.id, dependency = %dep, "installing");
            match self.runner.run(handle, &command, &opts).await {
                Ok(output) if output.success() => report.installed.push(dep.clone()),
                Ok(output) => {
                    let detail = crate::util::truncate_tail(&output.combined(), 500);
                    warn!(sandbox_id = %handle.id, dependency = %dep, exit_code = output.exit_code, "install failed");
                    report.failed.push((dep.clone(), detail));
                }
                Err(e) => {
                    warn!(sandbox_id = %handle.id, dependency = %dep, error = %e, "install failed");
                    report.failed.push((dep.clone(), e.to_string()));
                }
            }
        }

        report
    }

    async fn present_components(&self, handle: &SandboxHandle) -> BTreeSet<String> {
        let dir = format!("{}/src/components/ui", self.project_dir.trim_end_matches('/'));
        match self.files.list(handle, &dir).await {
            Ok(names) => names.into_iter().collect(),
            Err(_) => BTreeSet::new(),
        }
    }
}
