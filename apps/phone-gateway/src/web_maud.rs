use maud::{DOCTYPE, Markup, html};

const STYLESHEET_PATH: &str = "/site.css";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Index,
    Device,
    Phone,
    AgentStatus,
    DialerOnly,
}

impl PageKind {
    pub const fn title(self) -> &'static str {
        match self {
            Self::Index => "Phone Embed Demo",
            Self::Device => "Phone Device",
            Self::Phone => "Phone Control",
            Self::AgentStatus => "Agent Status",
            Self::DialerOnly => "Outbound Dialer",
        }
    }

    const fn slug(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Device => "device",
            Self::Phone => "phone",
            Self::AgentStatus => "agent-status",
            Self::DialerOnly => "dialer-only",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WidgetPage<'a> {
    pub kind: PageKind,
    pub ctm_host: &'a str,
    pub email: Option<&'a str>,
}

pub fn render_login_page() -> String {
    layout(
        "Sign in",
        html! {
            main class="login" {
                h1 { "Sign in" }
                form method="post" action="/login" {
                    label for="username" { "Email" }
                    input id="username" name="username" type="email" autocomplete="username" required;
                    label for="password" { "Password" }
                    input id="password" name="password" type="password" autocomplete="current-password" required;
                    button type="submit" { "Sign in" }
                }
            }
        },
    )
    .into_string()
}

/// The vendor widget scripts read the upstream host (and, for agent status,
/// the email) from the `data-*` attributes on `body`.
pub fn render_widget_page(page: &WidgetPage<'_>) -> String {
    let markup = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                meta name="ctm-host" content=(page.ctm_host);
                title { (page.kind.title()) }
                link rel="stylesheet" href=(STYLESHEET_PATH);
                script src={ "https://" (page.ctm_host) "/phoneapp/embed.js" } defer {}
            }
            body data-page=(page.kind.slug()) data-ctm-host=(page.ctm_host) data-email=[page.email] {
                main id="app" {
                    h1 { (page.kind.title()) }
                }
            }
        }
    };
    markup.into_string()
}

fn layout(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) }
                link rel="stylesheet" href=(STYLESHEET_PATH);
            }
            body { (content) }
        }
    }
}
