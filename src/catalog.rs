use std::fs;
use std::path::Path;

use serde_derive::Deserialize;
use tracing::{debug, warn};

use crate::descriptor::{image_repo, image_tag, BenchmarkDescriptor, CatalogEntry};
use crate::error::{BenchError, Result};
use crate::policy::{BenchArgs, RunPolicy};

/// A registered image and the policy used to run it.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub descriptor: BenchmarkDescriptor,
    pub args: Option<BenchArgs>,
    pub policy: RunPolicy,
}

/// Image catalog keyed by repo name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    images: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog { items: Vec::new() }
    }

    /// Registers an image, replacing any entry with the same repo.
    pub fn insert(&mut self, descriptor: BenchmarkDescriptor, args: Option<BenchArgs>) {
        let policy = RunPolicy::from_args(args.as_ref());
        let item = CatalogItem {
            descriptor,
            args,
            policy,
        };
        match self
            .items
            .iter_mut()
            .find(|i| i.descriptor.repo == item.descriptor.repo)
        {
            Some(existing) => {
                debug!("overriding catalog entry {}", item.descriptor.repo);
                *existing = item;
            }
            None => self.items.push(item),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Catalog> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        let mut catalog = Catalog::new();
        for entry in file.images {
            let descriptor = BenchmarkDescriptor::new(&entry.image, &entry.category);
            catalog.insert(descriptor, entry.bench_args);
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Catalog> {
        let yaml = fs::read_to_string(path)?;
        Catalog::from_yaml_str(&yaml)
    }

    /// Entries of `other` replace entries with the same repo.
    pub fn merge(&mut self, other: Catalog) {
        for item in other.items {
            self.insert(item.descriptor, item.args);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.iter()
    }

    pub fn lookup(&self, repo: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|i| i.descriptor.repo == repo)
    }

    /// Resolves an image reference to a run-specific descriptor.
    ///
    /// # Arguments
    /// * `image` - `repo` or `repo:tag`.
    /// * `default_tag` - Tag used when `image` carries none.
    ///
    /// # Returns
    /// A tagged copy of the catalog descriptor and the policy to run it with.
    pub fn resolve(
        &self,
        image: &str,
        default_tag: &str,
    ) -> Result<(BenchmarkDescriptor, &RunPolicy)> {
        let item = self
            .lookup(image_repo(image))
            .ok_or_else(|| BenchError::Configuration(image.to_string()))?;
        let tag = image_tag(image).unwrap_or(default_tag);
        Ok((item.descriptor.tagged(tag), &item.policy))
    }

    /// Resolves a batch, skipping (with a warning) anything not in the catalog.
    pub fn select<'a, S: AsRef<str>>(
        &'a self,
        images: &[S],
        default_tag: &str,
    ) -> Vec<(BenchmarkDescriptor, &'a RunPolicy)> {
        images
            .iter()
            .filter_map(|image| match self.resolve(image.as_ref(), default_tag) {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    warn!("{}, skip", e);
                    None
                }
            })
            .collect()
    }

    /// Every entry, optionally restricted to one category.
    pub fn select_all(
        &self,
        category: Option<&str>,
        default_tag: &str,
    ) -> Vec<(BenchmarkDescriptor, &RunPolicy)> {
        self.items
            .iter()
            .filter(|i| category.map_or(true, |c| i.descriptor.category == c))
            .map(|i| (i.descriptor.tagged(default_tag), &i.policy))
            .collect()
    }

    /// The images the tool knows how to benchmark out of the box.
    pub fn builtin() -> Catalog {
        let mut c = Catalog::new();
        let mut add = |name: &str, category: &str, args: Option<BenchArgs>| {
            c.insert(BenchmarkDescriptor::new(name, category), args);
        };

        for distro in [
            "alpine",
            "busybox",
            "crux",
            "cirros",
            "debian",
            "ubuntu",
            "ubuntu-upstart",
            "ubuntu-debootstrap",
            "centos",
            "fedora",
            "opensuse",
            "oraclelinux",
            "mageia",
        ] {
            add(distro, "distro", None);
        }

        let mysql_ready = "mysqld: ready for connections";
        for db in ["mysql", "percona", "mariadb"] {
            add(
                db,
                "database",
                Some(BenchArgs::wait_line(mysql_ready).with_env("MYSQL_ROOT_PASSWORD", "abc")),
            );
        }
        for (db, line) in [
            ("postgres", "database system is ready to accept connections"),
            ("redis", "server is now ready to accept connections"),
            ("crate", "started"),
            ("rethinkdb", "Server ready"),
        ] {
            add(db, "database", Some(BenchArgs::wait_line(line)));
        }

        for (lang, script) in [
            ("php", "php -r \"echo \\\"hello\\n\\\";\""),
            ("ruby", "ruby -e \"puts \\\"hello\\\"\""),
            ("jruby", "jruby -e \"puts \\\"hello\\\"\""),
            ("julia", "julia -e 'println(\"hello\")'"),
        ] {
            add(lang, "language", Some(BenchArgs::stdin(script)));
        }
        for (lang, arg) in [
            ("perl", "perl -e 'print(\"hello\\n\")'"),
            ("rakudo-star", "perl6 -e 'print(\"hello\\n\")'"),
            ("pypy", "pypy3 -c 'print(\"hello\")'"),
            ("python", "python -c 'print(\"hello\")'"),
        ] {
            add(lang, "language", Some(BenchArgs::arg(arg)));
        }
        add(
            "golang",
            "language",
            Some(BenchArgs::stdin("cd /go/src; go run main.go").with_mount("go", "/go/src")),
        );
        add(
            "clojure",
            "language",
            Some(BenchArgs::stdin("cd /hello/hello; lein run").with_mount("clojure", "/hello")),
        );
        add(
            "haskell",
            "language",
            Some(BenchArgs::stdin("\"hello\"").with_stdin_sh(None)),
        );
        add(
            "hylang",
            "language",
            Some(BenchArgs::stdin("(print \"hello\")").with_stdin_sh(None)),
        );
        add(
            "java",
            "language",
            Some(
                BenchArgs::stdin("cd /src; javac Main.java; java Main").with_mount("java", "/src"),
            ),
        );
        add(
            "mono",
            "language",
            Some(BenchArgs::stdin("cd /src; mcs main.cs; mono main.exe").with_mount("mono", "/src")),
        );
        add(
            "r-base",
            "language",
            Some(BenchArgs::stdin("sprintf(\"hello\")").with_stdin_sh(Some("R --no-save"))),
        );
        add(
            "gcc",
            "language",
            Some(BenchArgs::stdin("cd /src; gcc main.c; ./a.out").with_mount("gcc", "/src")),
        );
        add(
            "thrift",
            "language",
            Some(BenchArgs::stdin("cd /src; thrift --gen py hello.idl").with_mount("thrift", "/src")),
        );

        for (db, line) in [
            ("cassandra", "Listening for thrift clients"),
            ("mongo", "waiting for connections"),
            ("elasticsearch", "] started"),
        ] {
            add(db, "database", Some(BenchArgs::wait_line(line)));
        }

        add("hello-world", "other", Some(BenchArgs::default()));
        for (name, line) in [
            ("ghost", "Listening on"),
            ("drupal", "apache2 -D FOREGROUND"),
            ("jenkins", "Jenkins is fully up and running"),
            ("sonarqube", "Process[web] is up"),
            ("rabbitmq", "Server startup complete"),
        ] {
            add(name, "other", Some(BenchArgs::wait_line(line)));
        }
        add(
            "registry",
            "other",
            Some(
                BenchArgs::wait_url("http://localhost:5000")
                    .with_env("GUNICORN_OPTS", "[\"--preload\"]"),
            ),
        );

        add("nginx", "web-server", Some(BenchArgs::wait_url("http://localhost:80")));
        for (name, line) in [
            ("httpd", "httpd -D FOREGROUND"),
            ("glassfish", "Running GlassFish"),
            ("jetty", "main: Started"),
            ("php-zendserver", "Zend Server started"),
            ("tomcat", "Server startup"),
        ] {
            add(name, "web-server", Some(BenchArgs::wait_line(line)));
        }

        add(
            "django",
            "web-framework",
            Some(BenchArgs::stdin("django-admin startproject hello")),
        );
        add(
            "rails",
            "web-framework",
            Some(BenchArgs::stdin("rails new hello")),
        );
        for (name, bin) in [("node", "node"), ("iojs", "iojs")] {
            add(
                name,
                "web-framework",
                Some(
                    BenchArgs::wait_url("http://localhost:80")
                        .with_arg(&format!("{} /src/index.js", bin))
                        .with_mount(name, "/src"),
                ),
            );
        }

        c
    }
}
