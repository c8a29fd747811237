mod external;
mod helpers;

use helpers::TestApp;
