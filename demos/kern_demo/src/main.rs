use async_trait::async_trait;
use kern_web::auth::{Credentials, EnvCredentials, StaticCredentials, logout, permission_required};
use kern_web::module::{AccessLog, Limits, LimitsConfig, MemoryStore, SessionModule};
use kern_web::utils::Hierarchy;
use kern_web::view::{self, HtmlView, TextView, ViewConfig};
use kern_web::{App, Handler, Next, Request, Response, Router, WebError};
use pingora::server::Server;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct AdminLocals {
    username: String,
    permissions: String,
}

/// Greets the logged-in user; only reached past the login gate.
struct AdminPage {
    view: Arc<HtmlView>,
}

#[async_trait]
impl Handler for AdminPage {
    async fn handle(
        &self,
        res: &mut Response,
        req: &mut Request,
        _next: &mut Next,
    ) -> Result<(), WebError> {
        let session = req
            .context()
            .active_session()
            .ok_or_else(|| kern_web::error::unauthorized("no session"))?;
        let locals = AdminLocals {
            username: session.username.clone(),
            permissions: session.permissions.clone(),
        };
        self.view.render(res, req, locals);
        Ok(())
    }
}

#[derive(Serialize)]
struct Status {
    ok: bool,
    version: &'static str,
}

fn layers() -> Result<Hierarchy, Box<dyn std::error::Error>> {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    // KERN_SITE_DIR=/srv/site overrides single files of the default tree
    let site: Vec<PathBuf> = std::env::var_os("KERN_SITE_DIR").map(PathBuf::from).into_iter().collect();
    Ok(Hierarchy::new(site, base.join("default"))?)
}

fn build() -> Result<App, Box<dyn std::error::Error>> {
    let hierarchy = Arc::new(layers()?);
    let config = Arc::new(
        ViewConfig::from_env()
            .global("site_name", "kern demo")
            .global("version", env!("CARGO_PKG_VERSION")),
    );

    let html = |name: &str| -> Result<Arc<HtmlView>, Box<dyn std::error::Error>> {
        let path = hierarchy.lookup_required(PathBuf::from("views").join(name))?;
        Ok(Arc::new(HtmlView::html(path, config.clone())?))
    };
    let index = html("index.html")?;
    let login = html("login.html")?;
    let logout_view = html("logout.html")?;
    let admin = html("admin.html")?;
    let missing = html("errors/404.html")?;
    let robots = Arc::new(TextView::text(
        hierarchy.lookup_required("views/robots.txt")?,
        config.clone(),
    )?);

    let credentials = Arc::new(
        Credentials::new()
            .with(EnvCredentials::from_env())
            .with(StaticCredentials::new("admin", "admin", "*")),
    );

    let mut router = Router::default();
    router.site_defaults(hierarchy.clone());
    router.get("/robots.txt", view::handler(robots));
    router.mount(logout("/logout", logout_view));
    router.mount(permission_required("/admin", "admin", credentials, login));
    router.new_mounted("/admin", |area| {
        area.get_fn("/panic", |_res, _req, _next| panic!("requested panic"));
        area.get("/", Arc::new(AdminPage { view: admin }));
    });
    router.new_mounted("/api", |api| {
        api.get_fn("/status", |res, _req, _next| {
            res.json(
                200,
                Status {
                    ok: true,
                    version: env!("CARGO_PKG_VERSION"),
                },
            );
            Ok(())
        });
        api.post_fn("/echo", |res, req, _next| {
            let form: Vec<(String, String)> = req.form()?;
            res.json(200, form);
            Ok(())
        });
    });
    router.static_text("/healthz", "ok");
    // "/" is a prefix of every path; only the exact root renders the index
    router.get_fn("/", move |res, req, next| {
        if req.path() != "/" {
            next.resume();
            return Ok(());
        }
        index.render(res, req, ());
        Ok(())
    });
    router.not_found(view::not_found_handler(missing));

    let mut app = App::new(router);
    app.register_module(Limits::with_config(
        LimitsConfig::new().max_body_size(64 * 1024),
    ));
    app.register_module(AccessLog::default());
    app.register_module(SessionModule::new(Arc::new(MemoryStore::new())));
    Ok(app)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let app = match build() {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            std::process::exit(1);
        }
    };

    let addr = std::env::var("KERN_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    tracing::info!("Listening on http://{addr}");
    tracing::info!("Routes: /, /admin (admin/admin), /logout, /api/status, /api/echo, /css/site.css");

    if let Err(e) = run_server(app, &addr) {
        eprintln!("Pingora server error: {e}");
    }
}

fn run_server(app: App, addr: &str) -> std::io::Result<()> {
    let mut server = Server::new(None).map_err(|e| std::io::Error::other(e.to_string()))?;
    server.bootstrap();

    let mut service = app.to_service("kern web");
    service.add_tcp(addr);
    server.add_services(vec![Box::new(service)]);

    server.run_forever()
}
