use std::fmt::Write;

use consent_core::{Link, LinkStatus, OfferComponent, OfferSnapshot};

const STYLE: &str = "body{font-family:system-ui,sans-serif;max-width:40rem;margin:2rem auto;padding:0 1rem;color:#1d2433}\
.card{border:1px solid #d8dde6;border-radius:12px;padding:1.5rem}\
.badge{display:inline-block;background:#eef3ff;color:#2948a8;border-radius:6px;padding:2px 8px;margin-right:4px;font-size:.85rem}\
.price{font-size:1.6rem;font-weight:600}\
.actions{display:flex;gap:1rem;margin-top:1.5rem}\
button{padding:.7rem 1.4rem;border-radius:8px;border:0;font-size:1rem;cursor:pointer}\
.agree{background:#1f8f4e;color:#fff}.reject{background:#e8ebf0}";

pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{}</title><style>{STYLE}</style></head><body>{body}</body></html>",
        escape_html(title)
    )
}

pub fn render_error(message: &str) -> String {
    page(message, &format!("<div class=\"card\"><h1>{}</h1></div>", escape_html(message)))
}

/// Offer card for a link. Decision buttons are only shown while the link is
/// still undecided.
pub fn render_offer(link: &Link, token: &str) -> String {
    let snapshot = &link.offer_snapshot;
    let mut body = String::from("<div class=\"card\">");

    for badge in &snapshot.details.badges {
        let _ = write!(body, "<span class=\"badge\">{}</span>", escape_html(badge));
    }
    let _ = write!(
        body,
        "<h1>{}</h1><p>{}</p>",
        escape_html(&snapshot.title),
        escape_html(&snapshot.bundle)
    );
    if let Some(price) = price_line(snapshot) {
        let _ = write!(body, "<p class=\"price\">{}</p>", escape_html(&price));
    }

    for component in &snapshot.details.components {
        let _ = write!(body, "<h2>{}</h2><ul>", escape_html(component.title()));
        for feature in component_features(component) {
            let _ = write!(body, "<li>{}</li>", escape_html(&feature));
        }
        body.push_str("</ul>");
    }

    match link.status {
        LinkStatus::Agreed => body.push_str("<p><strong>You have agreed to this offer.</strong></p>"),
        LinkStatus::Rejected => body.push_str("<p><strong>You have declined this offer.</strong></p>"),
        _ => {
            let token = escape_html(token);
            let _ = write!(
                body,
                "<div class=\"actions\">\
                 <form method=\"post\" action=\"/api/agree\"><input type=\"hidden\" name=\"token\" value=\"{token}\">\
                 <button class=\"agree\" type=\"submit\">Agree</button></form>\
                 <form method=\"post\" action=\"/api/reject\"><input type=\"hidden\" name=\"token\" value=\"{token}\">\
                 <button class=\"reject\" type=\"submit\">Decline</button></form></div>"
            );
        }
    }
    body.push_str("</div>");

    page(&snapshot.title, &body)
}

fn price_line(snapshot: &OfferSnapshot) -> Option<String> {
    let price = snapshot.price?;
    Some(match snapshot.currency.as_deref() {
        Some(currency) => format!("{} {currency} / month", price.normalize()),
        None => format!("{} / month", price.normalize()),
    })
}

fn component_features(component: &OfferComponent) -> Vec<String> {
    let lines = match component {
        OfferComponent::Internet { max_speed_mbps, .. } => {
            vec![max_speed_mbps.map(|n| format!("Up to {n} Mbps"))]
        }
        OfferComponent::Tv { channels, ott, .. } => vec![
            channels.map(|n| format!("{n} channels")),
            (!ott.is_empty()).then(|| format!("Includes {}", ott.join(", "))),
        ],
        OfferComponent::Mobile {
            sims,
            data_gb,
            after_cap_kbps,
            onnet_minutes,
            offnet_minutes,
            sms,
            tv_plus_included,
            ..
        } => vec![
            sims.map(|n| format!("{n} SIM cards")),
            data_gb.map(|n| format!("{n} GB of data")),
            after_cap_kbps.map(|n| format!("{n} kbps after the cap")),
            onnet_minutes.map(|n| format!("{n} on-net minutes")),
            offnet_minutes.map(|n| format!("{n} minutes to other networks")),
            sms.map(|n| format!("{n} SMS")),
            tv_plus_included.then(|| "TV+ included".to_string()),
        ],
        OfferComponent::HomePhone {
            onnet_minutes,
            offnet_minutes,
            ..
        } => vec![
            onnet_minutes.map(|n| format!("{n} on-net minutes")),
            offnet_minutes.map(|n| format!("{n} minutes to other networks")),
        ],
        OfferComponent::SimDevices {
            sims,
            data_gb,
            after_cap_kbps,
            ..
        } => vec![
            sims.map(|n| format!("{n} SIM cards")),
            data_gb.map(|n| format!("{n} GB of data")),
            after_cap_kbps.map(|n| format!("{n} kbps after the cap")),
        ],
    };

    lines.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_is_escaped() {
        assert_eq!(
            escape_html("<b>\"Tom & Jerry's\"</b>"),
            "&lt;b&gt;&quot;Tom &amp; Jerry&#39;s&quot;&lt;/b&gt;"
        );
        assert!(render_error("<script>").contains("&lt;script&gt;"));
    }

    #[test]
    fn tv_features_list_channels_and_ott() {
        let tv = OfferComponent::Tv {
            title: "TV".to_string(),
            channels: Some(180),
            ott: vec!["Kinopoisk".to_string()],
        };
        assert_eq!(
            component_features(&tv),
            vec!["180 channels".to_string(), "Includes Kinopoisk".to_string()]
        );
    }
}
