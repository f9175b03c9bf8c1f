/// Query parameter the replica reads the target canister from.
pub const CANISTER_ID_PARAM: &str = "canisterId";

/// Rewrites a request target so it addresses `canister_id` on the replica.
///
/// The path and any existing query are kept verbatim and
/// `canisterId=<canister_id>` is appended as the last parameter.
pub fn rewrite_target(target: &str, canister_id: &str) -> String {
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };

    let mut rewritten = String::with_capacity(
        target.len() + CANISTER_ID_PARAM.len() + canister_id.len() + 3,
    );
    rewritten.push_str(path);
    rewritten.push('?');

    if let Some(query) = query {
        rewritten.push_str(query);
        rewritten.push('&');
    }

    rewritten.push_str(CANISTER_ID_PARAM);
    rewritten.push('=');
    rewritten.push_str(canister_id);

    rewritten
}
