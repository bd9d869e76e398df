//! Localized kick messages for banned players.

use std::collections::BTreeMap;

use sbguard_config::MessagesConfig;

/// Language used when a player's language has no template.
pub const FALLBACK_LANGUAGE: &str = "en";

const DEFAULT_TEMPLATE: &str = "You have been banned by this server, check {website} for more info";
const DEFAULT_TEMPLATE_NO_WEBSITE: &str = "You have been banned by this server";

/// Renders the message shown to a player when a ban is enforced.
///
/// Templates are keyed by language tag and may use the `{website}` and
/// `{reason}` placeholders. Lookup tries the exact tag, then its primary
/// subtag (`pt` for `pt-BR`), then [`FALLBACK_LANGUAGE`], then the built-in
/// English text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanMessages {
    website: String,
    templates: BTreeMap<String, String>,
}

impl BanMessages {
    #[must_use]
    pub fn from_config(config: &MessagesConfig) -> Self {
        Self {
            website: config.website.trim().to_string(),
            templates: config
                .templates
                .iter()
                .map(|(lang, template)| (lang.to_ascii_lowercase(), template.clone()))
                .collect(),
        }
    }

    fn template(&self, language: Option<&str>) -> &str {
        let language = language.map(str::to_ascii_lowercase);
        let primary = language
            .as_deref()
            .and_then(|lang| lang.split(['-', '_']).next())
            .map(str::to_string);

        [language, primary, Some(FALLBACK_LANGUAGE.to_string())]
            .into_iter()
            .flatten()
            .find_map(|lang| self.templates.get(&lang))
            .map(String::as_str)
            .unwrap_or(if self.website.is_empty() {
                DEFAULT_TEMPLATE_NO_WEBSITE
            } else {
                DEFAULT_TEMPLATE
            })
    }

    /// Render the kick message for a player.
    #[must_use]
    pub fn render(&self, language: Option<&str>, reason: Option<&str>) -> String {
        self.template(language)
            .replace("{website}", &self.website)
            .replace("{reason}", reason.unwrap_or_default())
    }
}
