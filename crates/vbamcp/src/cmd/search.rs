use serde_json::Value;
use vbamcp_rpc::tools::{SearchCodeArgs, SearchQuery, SearchResult, SEARCH_CODE};

use crate::cmd::SearchArgs;
use crate::exit::{rpc_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::output::{print_search, OutputFormat};
use crate::server::ServerArgs;

pub fn run(args: SearchArgs, server: &ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let request = search_request(&args)?;
    let session = server.connect()?;

    let result = session
        .call_tool_with(SEARCH_CODE, &request)
        .map_err(|err| rpc_error("search failed", err))?;
    if result.is_error {
        return Err(CliError::new(
            FAILURE,
            format!("search failed: {}", result.text()),
        ));
    }

    let payload: Value = result
        .payload(SEARCH_CODE)
        .map_err(|err| rpc_error("search failed", err))?;
    let decoded: SearchResult = serde_json::from_value(payload.clone())
        .map_err(|err| CliError::new(DATA_INVALID, format!("unexpected search result: {err}")))?;
    if let Some(error) = &decoded.error {
        return Err(CliError::new(FAILURE, format!("search failed: {error}")));
    }

    print_search(&payload, &decoded, format);
    Ok(SUCCESS)
}

fn search_request(args: &SearchArgs) -> CliResult<SearchCodeArgs> {
    let mut query = SearchQuery::parse(&args.query);
    if query.pattern.is_empty() {
        return Err(CliError::usage("search query must not be empty"));
    }
    query.regex |= args.regex;

    let mut request = SearchCodeArgs::from_query(&query);
    request.module_filter = args.module.clone();
    request.workbook_filter = args.workbook.clone();
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::USAGE;

    fn args(query: &str) -> SearchArgs {
        SearchArgs {
            query: query.into(),
            regex: false,
            module: None,
            workbook: None,
        }
    }

    #[test]
    fn slashes_select_regex() {
        let request = search_request(&args("/Sub\\s+Main/")).unwrap();
        assert_eq!(request.query, "Sub\\s+Main");
        assert_eq!(request.use_regex, Some(true));
    }

    #[test]
    fn filters_are_forwarded() {
        let mut search = args("Range(");
        search.module = Some("Module1".into());
        search.workbook = Some("Book1.xlsm".into());
        let request = search_request(&search).unwrap();
        assert_eq!(request.use_regex, Some(false));
        assert_eq!(request.module_filter.as_deref(), Some("Module1"));
        assert_eq!(request.workbook_filter.as_deref(), Some("Book1.xlsm"));
    }

    #[test]
    fn regex_flag_overrides_plain_query() {
        let mut search = args("Dim [a-z]+");
        search.regex = true;
        assert_eq!(search_request(&search).unwrap().use_regex, Some(true));
    }

    #[test]
    fn empty_query_is_rejected() {
        assert_eq!(search_request(&args("   ")).unwrap_err().code, USAGE);
    }
}
