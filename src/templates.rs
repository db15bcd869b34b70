use minijinja::{context, Environment};

const NOT_FOUND_TEMPLATE: &str = include_str!("templates/not_found.j2");
const CAROUSEL_ALT_TEMPLATE: &str = include_str!("templates/carousel_alt.j2");
const NEW_LEAD_TEMPLATE: &str = include_str!("templates/new_lead.j2");

const NOTIFICATION_PREVIEW_CHARS: usize = 200;

fn render(name: &str, source: &str, ctx: minijinja::Value) -> Option<String> {
    let mut env = Environment::new();
    env.add_template(name, source).ok()?;
    let template = env.get_template(name).ok()?;
    template.render(ctx).ok()
}

pub fn render_not_found_reply(query: &str) -> String {
    render(
        "not_found",
        NOT_FOUND_TEMPLATE,
        context! { query => query.trim() },
    )
    .unwrap_or_else(|| {
        "Sorry, no listing matched your message. Try adding a neighborhood or a property type."
            .to_string()
    })
}

pub fn render_carousel_alt_text(query: &str, count: usize) -> String {
    render(
        "carousel_alt",
        CAROUSEL_ALT_TEMPLATE,
        context! { query => query.trim(), count => count },
    )
    .unwrap_or_else(|| format!("{count} matching listings"))
}

pub struct NewLeadNotice<'a> {
    pub channel: &'a str,
    pub name: &'a str,
    pub lead_id: &'a str,
    pub first_message: &'a str,
}

pub fn render_new_lead_notice(notice: &NewLeadNotice<'_>) -> String {
    let preview = notice
        .first_message
        .trim()
        .chars()
        .take(NOTIFICATION_PREVIEW_CHARS)
        .collect::<String>();
    render(
        "new_lead",
        NEW_LEAD_TEMPLATE,
        context! {
            channel => notice.channel,
            name => notice.name,
            lead_id => notice.lead_id,
            first_message => preview,
        },
    )
    .unwrap_or_else(|| {
        format!(
            "New lead from {}: {} ({})",
            notice.channel, notice.name, notice.lead_id
        )
    })
}
