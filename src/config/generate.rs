pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# SEGMAIL CONFIGURATION
# =============================================================================
# Segmail renders a post once per audience segment, splits the audience into
# provider-sized batches and sends each batch through a bulk-mail provider.
#
# Values may reference environment variables as $env{NAME}; paths may start
# with ~.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/segmail/config.yml
#   3. /etc/segmail/config.yml

# =============================================================================
# STORAGE
# =============================================================================

storage:
  # DuckDB database holding members, emails, batches and recipients
  path: ~/.local/share/segmail/segmail.duckdb

# =============================================================================
# PROVIDER
# =============================================================================
# 'mailgun' delivers through the Mailgun messages API.
# 'log' only logs each batch (dry run).

provider:
  type: log
  # base_url: https://api.eu.mailgun.net/v3
  # domain: mg.example.com
  # api_key: $env{MAILGUN_API_KEY}
  # Recipients per batch (1-1000)
  batch_size: 1000
  timeout: 30s

# =============================================================================
# DISPATCH
# =============================================================================

dispatch:
  # Batches of one email sent concurrently
  concurrency: 2

# =============================================================================
# SITE
# =============================================================================

site:
  url: https://blog.example.com
  # Append ?ref=<site host> to links pointing at other sites
  outbound_ref: false

# =============================================================================
# AUDIENCE VERIFICATION
# =============================================================================
# When enabled on an unverified site, creating an email is refused while more
# than import_threshold members were added within window.

verification:
  enabled: false
  verified: false
  import_threshold: 1000
  window: 30days

# =============================================================================
# WEB SERVER
# =============================================================================

web:
  listen: 127.0.0.1:7200
  # Set to 0.0.0.0:7200 to allow external connections
"#
    .to_string()
}
