use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Args, Parser, Subcommand};
use classlink::{
    class_linker::Collaborators, gc::Gc, Class, ClassLinker, LinkError, LinkerConfig,
    NoStaticInitializer,
};
use classlink_base::{
    id::{ClassId, LoaderId, MethodId},
    Container,
};
use classlink_containers::{archive::ContainerArchive, ContainerDirectories};
use tracing_subscriber::layer::SubscriberExt;

mod formatter;
mod util;

/// Directory used for the boot class path when none is given
const DEFAULT_CLASS_DIR: &str = "./classpath/";
/// Environment variable naming a file to also write the log to
const ENV_LOG_FILE: &str = "CLASSLINK_LOG_FILE";

#[derive(Debug, Parser)]
#[clap(name = "ClassLink (Frontend)")]
#[clap(version = "0.1.0")]
#[clap(about = "Loads and links classes from container manifests")]
#[clap(propagate_version = true)]
struct CliArgs {
    #[clap(subcommand)]
    command: CliCommands,
}

#[derive(Debug, Subcommand)]
enum CliCommands {
    /// Link a single class and print its dispatch tables and layout
    Link {
        // Class name, either `pkg/Name` or a descriptor
        #[clap(value_name = "CLASS_NAME")]
        class_name: String,
        #[clap(flatten)]
        boot: BootClassPath,
        /// Load the class through a class loader over the manifests in these directories
        #[clap(long = "loader-dir", parse(from_os_str), value_name = "DIR")]
        loader_dirs: Vec<PathBuf>,
        /// Also initialize the class, and print its static values
        #[clap(long)]
        init: bool,
        /// Collect garbage after linking
        #[clap(long)]
        gc: bool,
    },
    /// Link every class on the boot class path, reporting those which fail
    Check {
        #[clap(flatten)]
        boot: BootClassPath,
        #[clap(long)]
        init: bool,
    },
}

#[derive(Debug, Args)]
struct BootClassPath {
    /// Directory of container manifests, searched in the order given
    #[clap(short = 'c', long = "class-dir", parse(from_os_str), value_name = "DIR")]
    class_dirs: Vec<PathBuf>,
    /// Zip archive of container manifests, searched after the directories
    #[clap(short = 'a', long = "archive", parse(from_os_str), value_name = "ZIP_FILE")]
    archives: Vec<PathBuf>,
}

struct EmptyWriter;
impl std::io::Write for EmptyWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn make_log_file(path: &Path) -> Option<Arc<std::fs::File>> {
    match std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
    {
        Ok(file) => Some(Arc::new(file)),
        Err(err) => {
            eprintln!("Failed to open log file '{}': {}", path.display(), err);
            None
        }
    }
}

fn init_logging(conf: &LinkerConfig) {
    let should_log_console = std::env::var("CLASSLINK_LOG_CONSOLE")
        .map(|x| x != "0")
        .unwrap_or(true);

    let console_layer = if should_log_console {
        Some(
            tracing_subscriber::fmt::Layer::default()
                .with_writer(std::io::stderr)
                .without_time()
                .event_format(formatter::Formatter),
        )
    } else {
        None
    };
    let file_layer = std::env::var_os(ENV_LOG_FILE)
        .and_then(|path| make_log_file(Path::new(&path)))
        .map(|file| {
            tracing_subscriber::fmt::Layer::default()
                .with_writer(file)
                .without_time()
                .event_format(formatter::Formatter)
        });

    let t_subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(conf.tracing_level)
        .without_time()
        .event_format(formatter::Formatter)
        .with_writer(|| EmptyWriter)
        .finish()
        .with(console_layer)
        .with(file_layer);

    if let Err(err) = tracing::subscriber::set_global_default(t_subscriber) {
        eprintln!("Failed to set the global tracing subscriber: {}", err);
    }
}

fn main() {
    // Note that clap autoexits if it didn't get a thing to do
    let args = CliArgs::parse();

    let mut conf = LinkerConfig::new();
    conf.log_class_loading = true;
    init_logging(&conf);

    let result = match args.command {
        CliCommands::Link {
            class_name,
            boot,
            loader_dirs,
            init,
            gc,
        } => link_class(conf, &class_name, &boot, &loader_dirs, init, gc),
        CliCommands::Check { boot, init } => check_classes(conf, &boot, init),
    };

    if let Err(err) = result {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

#[derive(Debug)]
enum FrontendError {
    Containers(classlink_containers::LoadContainerError),
    ClassDirectory { path: PathBuf, error: std::io::Error },
    Link(LinkError),
    /// Some classes failed to link, each already reported
    Failures(usize),
}
impl From<classlink_containers::LoadContainerError> for FrontendError {
    fn from(err: classlink_containers::LoadContainerError) -> Self {
        Self::Containers(err)
    }
}
impl From<LinkError> for FrontendError {
    fn from(err: LinkError) -> Self {
        Self::Link(err)
    }
}
impl std::fmt::Display for FrontendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrontendError::Containers(err) => write!(f, "{}", err),
            FrontendError::ClassDirectory { path, error } => {
                write!(f, "bad class directory '{}': {}", path.display(), error)
            }
            FrontendError::Link(err) => write!(f, "{}", err),
            FrontendError::Failures(count) => write!(f, "{} classes failed to link", count),
        }
    }
}

fn directories(paths: &[PathBuf]) -> Result<ContainerDirectories, FrontendError> {
    let mut directories = ContainerDirectories::default();
    for path in paths {
        directories
            .add(path)
            .map_err(|error| FrontendError::ClassDirectory {
                path: path.clone(),
                error,
            })?;
    }

    Ok(directories)
}

fn load_boot_class_path(boot: &BootClassPath) -> Result<Vec<Container>, FrontendError> {
    let mut class_dirs = boot.class_dirs.clone();
    if class_dirs.is_empty() && boot.archives.is_empty() {
        let default = Path::new(DEFAULT_CLASS_DIR);
        if default.is_dir() {
            class_dirs.push(default.to_owned());
        } else {
            tracing::warn!("No boot class path given, only root classes will be available");
        }
    }

    let mut containers = directories(&class_dirs)?.load_containers()?;
    for path in &boot.archives {
        containers.extend(ContainerArchive::open(path)?.load_containers()?);
    }

    Ok(containers)
}

fn create_linker(conf: LinkerConfig, boot: &BootClassPath) -> Result<(ClassLinker, Arc<Gc>), FrontendError> {
    let containers = load_boot_class_path(boot)?;
    let gc = Arc::new(Gc::new());
    let collaborators = Collaborators {
        heap: gc.clone(),
        static_initializer: Arc::new(NoStaticInitializer),
    };

    tracing::info!("ClassLink Initializing");
    let linker = ClassLinker::create(containers, conf, collaborators)?;
    Ok((linker, gc))
}

fn create_loader(linker: &ClassLinker, loader_dirs: &[PathBuf]) -> Result<Option<LoaderId>, FrontendError> {
    if loader_dirs.is_empty() {
        return Ok(None);
    }

    let containers = directories(loader_dirs)?.load_containers()?;
    let ids: Vec<_> = containers
        .into_iter()
        .map(|container| linker.register_container(container))
        .collect();
    Ok(Some(linker.create_class_loader(&ids)?))
}

fn link_class(
    conf: LinkerConfig,
    class_name: &str,
    boot: &BootClassPath,
    loader_dirs: &[PathBuf],
    init: bool,
    gc: bool,
) -> Result<(), FrontendError> {
    let (linker, heap) = create_linker(conf, boot)?;
    let loader = create_loader(&linker, loader_dirs)?;

    let descriptor = util::class_descriptor(class_name);
    let id = linker.find_class(&descriptor, loader)?;
    if init {
        linker.initialize_class(id)?;
    }

    let class = linker.class(id)?;
    print_class(&linker, &class);

    if gc {
        let freed = heap.collect_garbage(&linker);
        println!(
            "gc: freed {} objects, {} live ({} bytes)",
            freed,
            heap.len(),
            heap.bytes_used()
        );
    }

    Ok(())
}

fn check_classes(conf: LinkerConfig, boot: &BootClassPath, init: bool) -> Result<(), FrontendError> {
    let (linker, _) = create_linker(conf, boot)?;

    let descriptors: Vec<String> = linker
        .boot_class_path()
        .into_iter()
        .map(|id| linker.find_reference_cache(id))
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .flat_map(|registered| {
            registered
                .container()
                .class_descriptors()
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .collect();

    let mut failures = 0;
    for descriptor in &descriptors {
        let result = linker.find_system_class(descriptor).and_then(|id| {
            if init {
                linker.initialize_class(id)?;
            }
            Ok(id)
        });

        match result {
            Ok(_) => println!("ok      {}", descriptor),
            Err(err) => {
                failures += 1;
                println!("FAILED  {}: {}", descriptor, err);
            }
        }
    }

    println!(
        "{} classes checked, {} failed, {} published",
        descriptors.len(),
        failures,
        linker.class_count()
    );

    if failures == 0 {
        Ok(())
    } else {
        Err(FrontendError::Failures(failures))
    }
}

fn describe_class(linker: &ClassLinker, id: ClassId) -> String {
    linker.class(id).map_or_else(
        |_| format!("<class {}>", id.get()),
        |class| class.descriptor().to_owned(),
    )
}

fn describe_method(linker: &ClassLinker, id: MethodId) -> String {
    let (_, index) = id.decompose();
    match linker.method_class(id) {
        Ok(class) => match class.method(index) {
            Some(method) if method.is_miranda() => format!(
                "{}.{}{} (miranda)",
                class.descriptor(),
                method.name(),
                method.descriptor_text()
            ),
            Some(method) => format!(
                "{}.{}{}",
                class.descriptor(),
                method.name(),
                method.descriptor_text()
            ),
            None => format!("<method {:?}>", id),
        },
        Err(_) => format!("<method {:?}>", id),
    }
}

fn print_class(linker: &ClassLinker, class: &Class) {
    println!("{} ({:?})", class.descriptor(), class.status());
    println!("  access: {:?}", class.access_flags());
    if let Some(super_id) = class.super_class() {
        println!("  super: {}", describe_class(linker, super_id));
    }

    let linked = if let Some(linked) = class.linked() {
        linked
    } else {
        return;
    };

    if !linked.interfaces().is_empty() {
        println!("  interfaces:");
        for interface in linked.interfaces() {
            println!("    {}", describe_class(linker, *interface));
        }
    }

    println!("  vtable ({}):", linked.vtable().len());
    for (index, method) in linked.vtable().iter().enumerate() {
        println!("    [{}] {}", index, describe_method(linker, *method));
    }

    if !linked.iftable().is_empty() {
        println!("  iftable:");
        for entry in linked.iftable() {
            let slots: Vec<String> = entry
                .slots()
                .iter()
                .map(|slot| usize::from(*slot).to_string())
                .collect();
            println!(
                "    {} -> [{}]",
                describe_class(linker, entry.interface()),
                slots.join(", ")
            );
        }
    }

    println!("  instance size: {}", linked.instance_size());
    println!("  static size: {}", linked.static_size());
    for field in class.fields() {
        let kind = if field.is_static() { "static" } else { "field" };
        match field.offset() {
            Some(offset) => println!(
                "    {} {} {} @ {}",
                kind,
                field.descriptor(),
                field.name(),
                offset
            ),
            None => println!("    {} {} {}", kind, field.descriptor(), field.name()),
        }
    }

    let references: Vec<String> = linked
        .reference_offsets()
        .iter()
        .map(|offset| offset.to_string())
        .collect();
    println!("  reference offsets: [{}]", references.join(", "));

    if class.static_storage().is_some() {
        println!("  static values:");
        for (index, field) in class.fields().iter().enumerate() {
            if let Some(value) = class.static_value(index) {
                println!("    {} = {:?}", field.name(), value);
            }
        }
    }
}
